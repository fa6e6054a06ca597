//! Driver attachment
//!
//! Once the virtual disk is published, the firmware's disk I/O and
//! partition drivers have to be bound to it so its filesystems appear.
//! Drivers are found by the name they report through the component name
//! protocols; the firmware itself sits behind [`DriverHost`].

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use crate::error::DeviceError;

/// Disk I/O driver name fragment
pub const DISK_IO_DRIVER: &str = "Disk I/O Driver";

/// Partition driver name fragment
pub const PARTITION_DRIVER: &str = "Partition Driver";

/// Component name protocol flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameProtocol {
    /// `EFI_COMPONENT_NAME2_PROTOCOL`
    ComponentName2,
    /// Legacy `EFI_COMPONENT_NAME_PROTOCOL`
    ComponentName,
}

impl NameProtocol {
    /// Search order
    pub const ORDER: [NameProtocol; 2] = [NameProtocol::ComponentName2, NameProtocol::ComponentName];
}

/// Firmware services needed to bind drivers
pub trait DriverHost {
    /// Firmware handle
    type Handle: Copy + fmt::Debug;
    /// Firmware status on failure
    type Error: fmt::Debug + fmt::Display;

    /// Handles of every driver publishing `protocol`
    fn locate_drivers(&mut self, protocol: NameProtocol) -> Result<Vec<Self::Handle>, Self::Error>;

    /// English name `driver` reports through `protocol`
    fn driver_name(&mut self, driver: Self::Handle, protocol: NameProtocol) -> Option<String>;

    /// Connect `driver` (or every driver if `None`) to `controller`
    fn connect_controller(
        &mut self,
        controller: Self::Handle,
        driver: Option<Self::Handle>,
        recursive: bool,
    ) -> Result<(), Self::Error>;
}

/// Connect the first driver whose name contains `name` to `controller`
///
/// Drivers publishing the newer name protocol are searched first.
pub fn connect_driver<H: DriverHost>(
    host: &mut H,
    controller: H::Handle,
    name: &str,
) -> Result<(), DeviceError<H::Error>> {
    for protocol in NameProtocol::ORDER {
        let drivers = host.locate_drivers(protocol).map_err(DeviceError::Io)?;

        let found = drivers.into_iter().find(|&driver| {
            host.driver_name(driver, protocol)
                .is_some_and(|driver_name| driver_name.contains(name))
        });

        if let Some(driver) = found {
            log::debug!("found driver <{}> via {:?}: {:?}", name, protocol, driver);
            return host
                .connect_controller(controller, Some(driver), true)
                .map_err(DeviceError::Io);
        }

        log::debug!("<{}> not found via {:?}", name, protocol);
    }

    Err(DeviceError::NotFound)
}

/// Bind the disk I/O and partition drivers to the published disk
///
/// If the partition driver cannot be connected every driver is connected
/// recursively instead.
pub fn attach<H: DriverHost>(host: &mut H, controller: H::Handle) -> Result<(), DeviceError<H::Error>> {
    if let Err(e) = connect_driver(host, controller, DISK_IO_DRIVER) {
        log::debug!("connect disk I/O driver: {}", e);
    }

    let Err(e) = connect_driver(host, controller, PARTITION_DRIVER) else {
        return Ok(());
    };

    log::debug!("connect partition driver: {}, connecting all drivers", e);
    host.connect_controller(controller, None, true).map_err(|e| {
        log::error!("connect all drivers failed: {}", e);
        DeviceError::Io(e)
    })
}
