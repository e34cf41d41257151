use std::cmp::max;
use std::fmt::{Display, Formatter};
use std::net::Ipv4Addr;
use std::time::Duration;

use anyhow::Context;
use log::{error, info, warn};
use serde::Deserialize;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};

use crate::local_interface::{LocalDevice, DEFAULT_REPLY_TIMEOUT};

/// Multicast group all Govee devices listen on for scan requests.
pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
/// Port of the scan multicast group.
pub const MULTICAST_PORT: u16 = 4001;
/// Port devices send scan and status replies to.
pub const RESPONSE_PORT: u16 = 4002;
/// Port each device accepts command datagrams on.
pub const DEVICE_PORT: u16 = 4003;

const SCAN_REQUEST: &str = r#"{"msg":{"cmd":"scan","data":{"account_topic":"reserve"}}}"#;
const MULTICAST_TTL: u32 = 2;

/**
Addresses and timing used by a discovery scan.

The defaults are the fixed ports of the Govee local protocol; tests swap in
loopback fakes on ephemeral ports. `reply_timeout` bounds each per-device
state query issued at the end of the scan window.
*/
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub multicast_group: Ipv4Addr,
    pub multicast_port: u16,
    pub response_port: u16,
    pub device_port: u16,
    pub reply_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        DiscoveryConfig {
            multicast_group: MULTICAST_GROUP,
            multicast_port: MULTICAST_PORT,
            response_port: RESPONSE_PORT,
            device_port: DEVICE_PORT,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }
}

#[derive(Deserialize, Debug)]
struct ScanEnvelope {
    msg: ScanMessage,
}

#[derive(Deserialize, Debug)]
struct ScanMessage {
    data: ScanData,
}

/// The `msg.data` of a scan reply: where the device is and what it is.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanData {
    pub ip: Ipv4Addr,
    pub device: String,
    pub sku: String,
}

impl Display for ScanData {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "IP: {}, Device: {}, SKU: {}",
            self.ip, self.device, self.sku
        )
    }
}

/**
The devices found on the local network, keyed by device address.

A reply for an already-registered address replaces the stored entry (devices
may answer a scan more than once, and a re-scan may find a device on a fresh
IP); new addresses append. Lookups are linear scans returning `None` on a
miss, never an error.
*/
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<LocalDevice>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        DeviceRegistry::default()
    }

    /// Registers a device, replacing any entry with the same address.
    pub fn register(&mut self, device: LocalDevice) {
        if let Some(existing) = self
            .devices
            .iter_mut()
            .find(|d| d.address() == device.address())
        {
            info!(
                "Device {} answered again, refreshing its entry",
                device.address()
            );
            *existing = device;
        } else {
            self.devices.push(device);
        }
    }

    pub fn find_by_address(&self, address: &str) -> Option<&LocalDevice> {
        self.devices.iter().find(|d| d.address() == address)
    }

    pub fn find_by_address_mut(&mut self, address: &str) -> Option<&mut LocalDevice> {
        self.devices.iter_mut().find(|d| d.address() == address)
    }

    pub fn find_by_ip(&self, ip: Ipv4Addr) -> Option<&LocalDevice> {
        self.devices.iter().find(|d| d.ip() == ip)
    }

    pub fn find_by_ip_mut(&mut self, ip: Ipv4Addr) -> Option<&mut LocalDevice> {
        self.devices.iter_mut().find(|d| d.ip() == ip)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LocalDevice> {
        self.devices.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut LocalDevice> {
        self.devices.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn devices(&self) -> &[LocalDevice] {
        &self.devices
    }
}

pub struct Discovery;

impl Discovery {
    /// Decodes a scan reply datagram, or logs and returns `None` if the
    /// payload is not the expected JSON.
    pub fn decode_scan_response(data: &[u8]) -> Option<ScanData> {
        match serde_json::from_slice::<ScanEnvelope>(data) {
            Ok(envelope) => Some(envelope.msg.data),
            Err(e) => {
                error!("Error decoding scan reply JSON: {}", e);
                None
            }
        }
    }

    /// Scans the local network for devices, collecting replies until
    /// `given_timeout` elapses, then querying each device's state.
    pub async fn find_devices(given_timeout: Duration) -> anyhow::Result<DeviceRegistry> {
        Self::find_devices_with(given_timeout, &DiscoveryConfig::default()).await
    }

    pub async fn find_devices_with(
        given_timeout: Duration,
        config: &DiscoveryConfig,
    ) -> anyhow::Result<DeviceRegistry> {
        let mut registry = DeviceRegistry::new();
        Self::scan_into(&mut registry, given_timeout, config).await?;
        Ok(registry)
    }

    pub(crate) async fn scan_into(
        registry: &mut DeviceRegistry,
        given_timeout: Duration,
        config: &DiscoveryConfig,
    ) -> anyhow::Result<()> {
        // Bind the reply socket before broadcasting so early answers from
        // fast devices are not lost.
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, config.response_port))
            .await
            .context("Failed to bind discovery response socket")?;

        let send_socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .await
            .context("Failed to bind scan request socket")?;
        send_socket.set_multicast_ttl_v4(MULTICAST_TTL)?;
        let scan_target = (config.multicast_group, config.multicast_port);
        match send_socket
            .send_to(SCAN_REQUEST.as_bytes(), scan_target)
            .await
        {
            Ok(_) => info!(
                "Scan request sent to {}:{}",
                config.multicast_group, config.multicast_port
            ),
            // A failed broadcast is not fatal; keep listening for whatever
            // replies still arrive.
            Err(e) => error!(
                "Error sending scan request to {}:{} | {}",
                config.multicast_group, config.multicast_port, e
            ),
        }

        let mut buffer = [0; 1024];
        let timeout_end = Instant::now() + given_timeout;

        loop {
            let now = Instant::now();
            if now >= timeout_end {
                break;
            }

            match timeout(timeout_end - now, socket.recv_from(&mut buffer)).await {
                Ok(Ok((number_of_bytes, src_addr))) => {
                    let received = &buffer[..number_of_bytes];
                    if let Some(scan_data) = Self::decode_scan_response(received) {
                        info!("Scan reply from {}: {}", src_addr, scan_data);
                        registry.register(LocalDevice::from_scan(&scan_data, config));
                    }
                }
                Ok(Err(e)) => {
                    error!("Failed to receive scan reply: {}", e);
                    break;
                }
                Err(_) => {
                    info!("Discovery window complete. If devices are missing, try increasing the search timeout.");
                    break;
                }
            }
        }

        // Release the shared response port before the state queries reuse it.
        drop(socket);

        for device in registry.iter_mut() {
            if let Err(e) = device.update().await {
                warn!("State query for {} failed: {}", device.address(), e);
            }
        }
        Ok(())
    }

    pub fn pretty_print_devices(registry: &DeviceRegistry) {
        // Determine the maximum width for each column
        let max_ip_width = registry
            .iter()
            .map(|d| d.ip().to_string().len())
            .max()
            .unwrap_or(10);
        let max_address_width = registry
            .iter()
            .map(|d| max(d.address().len(), 14))
            .max()
            .unwrap_or(14);
        let max_sku_width = registry.iter().map(|d| d.sku().len()).max().unwrap_or(5);

        // Print the header with appropriate spacing
        println!(
            "{:<ip_width$} {:<address_width$} {:<sku_width$} {:<7} {:<10}",
            "IP Address",
            "Device Address",
            "SKU",
            "Power",
            "Brightness",
            ip_width = max_ip_width + 2,
            address_width = max_address_width + 2,
            sku_width = max_sku_width + 2,
        );

        // Print the separator line
        println!(
            "{:<ip_width$} {:<address_width$} {:<sku_width$} {:<7} {:<10}",
            "-".repeat(max_ip_width),
            "-".repeat(max_address_width),
            "-".repeat(max_sku_width),
            "-".repeat(7),
            "-".repeat(10),
            ip_width = max_ip_width + 2,
            address_width = max_address_width + 2,
            sku_width = max_sku_width + 2,
        );

        // Print each device entry with appropriate spacing
        for device in registry.iter() {
            println!(
                "{:<ip_width$} {:<address_width$} {:<sku_width$} {:<7} {:<10}",
                device.ip(),
                device.address(),
                device.sku(),
                if device.is_on() { "on" } else { "off" },
                device.brightness(),
                ip_width = max_ip_width + 2,
                address_width = max_address_width + 2,
                sku_width = max_sku_width + 2,
            );
        }
    }
}

/**
A discovery client that keeps its registry across scans.

Re-running [`LocalApiClient::discover`] unions the results by device
address: devices found again get a refreshed entry, devices that stayed
silent keep their previous one.
*/
#[derive(Debug, Default)]
pub struct LocalApiClient {
    registry: DeviceRegistry,
    config: DiscoveryConfig,
}

impl LocalApiClient {
    pub fn new() -> Self {
        LocalApiClient::default()
    }

    pub fn with_config(config: DiscoveryConfig) -> Self {
        LocalApiClient {
            registry: DeviceRegistry::new(),
            config,
        }
    }

    pub async fn discover(&mut self, given_timeout: Duration) -> anyhow::Result<&DeviceRegistry> {
        Discovery::scan_into(&mut self.registry, given_timeout, &self.config).await?;
        Ok(&self.registry)
    }

    pub fn devices(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn devices_mut(&mut self) -> &mut DeviceRegistry {
        &mut self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn loopback_config(
        multicast_port: u16,
        response_port: u16,
        device_port: u16,
    ) -> DiscoveryConfig {
        DiscoveryConfig {
            multicast_group: Ipv4Addr::LOCALHOST,
            multicast_port,
            response_port,
            device_port,
            reply_timeout: Duration::from_millis(200),
        }
    }

    /// Binds an ephemeral UDP port and returns it, releasing the socket.
    async fn free_port() -> u16 {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        socket.local_addr().unwrap().port()
    }

    fn scan_reply(ip: &str, device: &str, sku: &str) -> String {
        json!({
            "msg": {
                "cmd": "scan",
                "data": {"ip": ip, "device": device, "sku": sku}
            }
        })
        .to_string()
    }

    #[test]
    fn test_decode_scan_response() {
        let data = Discovery::decode_scan_response(
            scan_reply("192.168.1.50", "AA:BB:CC:DD", "H6159").as_bytes(),
        )
        .unwrap();
        assert_eq!(data.ip, Ipv4Addr::new(192, 168, 1, 50));
        assert_eq!(data.device, "AA:BB:CC:DD");
        assert_eq!(data.sku, "H6159");
    }

    #[test]
    fn test_decode_scan_response_rejects_garbage() {
        assert!(Discovery::decode_scan_response(b"not json{").is_none());
        assert!(Discovery::decode_scan_response(b"{\"msg\":{}}").is_none());
    }

    #[test]
    fn test_empty_registry_lookups_miss() {
        let registry = DeviceRegistry::new();
        assert!(registry.find_by_address("AA:BB").is_none());
        assert!(registry.find_by_ip(Ipv4Addr::LOCALHOST).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registry_replaces_by_address() {
        let mut registry = DeviceRegistry::new();
        registry.register(LocalDevice::new(
            Ipv4Addr::new(192, 168, 1, 50),
            "AA:BB",
            "H6159",
        ));
        registry.register(LocalDevice::new(
            Ipv4Addr::new(192, 168, 1, 51),
            "AA:BB",
            "H6159",
        ));
        registry.register(LocalDevice::new(
            Ipv4Addr::new(192, 168, 1, 60),
            "CC:DD",
            "H5083",
        ));

        assert_eq!(registry.len(), 2);
        let refreshed = registry.find_by_address("AA:BB").unwrap();
        assert_eq!(refreshed.ip(), Ipv4Addr::new(192, 168, 1, 51));
        assert!(registry
            .find_by_ip(Ipv4Addr::new(192, 168, 1, 50))
            .is_none());
    }

    #[tokio::test]
    async fn test_scan_with_no_devices_waits_full_window() {
        let config = loopback_config(free_port().await, free_port().await, free_port().await);
        let window = Duration::from_millis(300);

        let start = Instant::now();
        let registry = Discovery::find_devices_with(window, &config).await.unwrap();

        assert!(registry.is_empty());
        // The bounded-wait contract: an empty scan takes the whole window.
        assert!(start.elapsed() >= window);
    }

    #[tokio::test]
    async fn test_scan_survives_malformed_datagrams() {
        let fake_group = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let multicast_port = fake_group.local_addr().unwrap().port();
        let response_port = free_port().await;
        let config = loopback_config(multicast_port, response_port, free_port().await);

        // Fake device: wait for the scan request, answer with garbage first,
        // then with a proper reply. Ignores the trailing state query.
        let responder = tokio::spawn(async move {
            let mut buffer = [0; 1024];
            let (n, _) = fake_group.recv_from(&mut buffer).await.unwrap();
            let request: serde_json::Value = serde_json::from_slice(&buffer[..n]).unwrap();
            assert_eq!(request["msg"]["cmd"], "scan");

            let target = (Ipv4Addr::LOCALHOST, response_port);
            fake_group.send_to(b"}{ bad", target).await.unwrap();
            fake_group
                .send_to(
                    scan_reply("127.0.0.1", "AA:BB:CC:DD", "H6159").as_bytes(),
                    target,
                )
                .await
                .unwrap();
        });

        let registry = Discovery::find_devices_with(Duration::from_millis(500), &config)
            .await
            .unwrap();
        responder.await.unwrap();

        assert_eq!(registry.len(), 1);
        let device = registry.find_by_address("AA:BB:CC:DD").unwrap();
        assert_eq!(device.sku(), "H6159");
        assert_eq!(device.ip(), Ipv4Addr::LOCALHOST);
    }

    #[tokio::test]
    async fn test_repeated_discovery_unions_by_address() {
        let device_port = free_port().await;
        let response_port = free_port().await;
        let config = loopback_config(free_port().await, response_port, device_port);
        let mut client = LocalApiClient::with_config(config);
        client.devices_mut().register(
            LocalDevice::new(Ipv4Addr::LOCALHOST, "AA:BB", "H6159")
                .with_ports(device_port, response_port)
                .with_reply_timeout(Duration::from_millis(100)),
        );

        // No devices answer this scan; the earlier entry must survive.
        client.discover(Duration::from_millis(200)).await.unwrap();
        assert_eq!(client.devices().len(), 1);
        assert!(client.devices().find_by_address("AA:BB").is_some());
    }
}
