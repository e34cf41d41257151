//! # Govee Control Library
//!
//! `govee-control-lib` is a Rust library for controlling Govee smart lights and
//! appliances. It speaks two independent channels: the Govee cloud REST API
//! (keyed by a `Govee-API-Key` header) and the local-network UDP protocol
//! (multicast discovery plus per-device command datagrams).
//!
//! This library is designed to be used by command-line tools or other client
//! applications that need to drive Govee hardware.
//!
//! ## Features
//!
//! - Device discovery on local networks via the multicast scan protocol
//! - Local UDP control: power, brightness, color, color temperature
//! - State queries with a bounded reply wait
//! - Cloud REST client: device listing, control, and state retrieval
//!
//! ## Example
//!
//! Here is a simple example of how to use the library to discover Govee
//! devices on your network:
//!
//! ```no_run
//! use govee_control_lib::util::discovery::Discovery;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Discover devices with a 5-second scan window
//!     let registry = Discovery::find_devices(Duration::from_secs(5)).await?;
//!
//!     // Iterate over the discovered devices and print their details
//!     for device in registry.iter() {
//!         println!("Found device: {}", device);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Disclaimer
//!
//! This project is not affiliated with, authorized by, endorsed by, or in any way officially connected
//! with Govee or its affiliates. The official Govee website can be found at [https://www.govee.com](https://www.govee.com).
//!
//! ## License
//!
//! This project is dual-licensed under the MIT License and the Apache License, Version 2.0.
//! You may choose to use either license, depending on your project needs.
//! See the `LICENSE-MIT` and `LICENSE-APACHE` files for the full text of the licenses.

// The `cloud_interface` module wraps the Govee developer REST API: listing
// the account's devices, dispatching control commands to the light or
// appliance endpoint, and fetching device state.
//
// Example usage:
//
// ```
// use govee_control_lib::cloud_interface::CloudClient;
//
// #[tokio::main]
// async fn main() {
//     let mut client = CloudClient::new("my-api-key");
//     let devices = client.get_devices(false).await.unwrap();
//     println!("{} devices", devices.len());
// }
// ```
pub mod cloud_interface;

// The `local_interface` module talks to one device over its local UDP
// control port: power, brightness, color and state-query commands, with an
// optional bounded wait for the reply datagram.
//
// Example usage:
//
// ```
// use govee_control_lib::local_interface::LocalDevice;
//
// #[tokio::main]
// async fn main() {
//     let mut device = LocalDevice::new("192.168.1.50".parse().unwrap(), "AA:BB", "H6159");
//     device.turn_on().await.unwrap();
// }
// ```
pub mod local_interface;

// The `util` module provides the shared `Color` value type and the
// multicast discovery scan with its device registry.
//
// Example usage:
//
// ```
// use govee_control_lib::util::discovery::Discovery;
// use std::time::Duration;
//
// #[tokio::main]
// async fn main() {
//     let registry = Discovery::find_devices(Duration::from_secs(5)).await.unwrap();
//     Discovery::pretty_print_devices(&registry);
// }
// ```
pub mod util;
