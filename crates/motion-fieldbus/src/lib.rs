#![doc = "Fieldbus layer: process image layout, stepper protocol driver, and the EtherCAT bus lifecycle."]

pub mod bus;
pub mod image;
pub mod stepper;

#[cfg(all(feature = "soem", target_os = "linux"))]
pub mod soem;

pub use bus::*;
pub use image::*;
pub use stepper::*;

#[cfg(all(feature = "soem", target_os = "linux"))]
pub use soem::SoemTransport;
