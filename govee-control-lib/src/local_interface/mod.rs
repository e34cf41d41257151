use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

use anyhow::{bail, Context};
use derivative::Derivative;
use log::{error, info};
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};

use crate::util::color::Color;
use crate::util::discovery::{DiscoveryConfig, ScanData, DEVICE_PORT, RESPONSE_PORT};

/// Default bound on waiting for a single command reply.
///
/// The device protocol has no acknowledgement for most commands; only
/// `devStatus` answers, and a silent device would otherwise stall the caller
/// forever. A reply that misses this window is reported as "no response".
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(2);

/**
A command understood by the device's local UDP control port.

Serializes to the `{"cmd": .., "data": {..}}` object nested under `msg` in
every request datagram.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "cmd", content = "data")]
pub enum LocalCommand {
    /// Power on (`value: 1`) or off (`value: 0`).
    #[serde(rename = "turn")]
    Turn { value: u8 },
    /// Brightness in the range 0..=100.
    #[serde(rename = "brightness")]
    Brightness { value: u8 },
    /// Color and white temperature in one command.
    #[serde(rename = "colorwc")]
    ColorWc {
        color: Color,
        #[serde(rename = "colorTemInKelvin")]
        color_tem_in_kelvin: u32,
    },
    /// State query. The only command the device answers.
    #[serde(rename = "devStatus")]
    DevStatus {},
}

#[derive(Serialize)]
struct RequestEnvelope<'a> {
    msg: &'a LocalCommand,
}

#[derive(Deserialize, Debug)]
struct ResponseEnvelope {
    msg: ResponseMessage,
}

#[derive(Deserialize, Debug)]
struct ResponseMessage {
    #[serde(default)]
    cmd: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// The `msg.data` object of a `devStatus` reply.
///
/// Devices omit fields they consider unset; every field therefore defaults,
/// yielding "off, dark, black, 0 K" for a reply of `{}`.
///
/// Note the capitalized `ColorTemInKelvin` reply key; the `colorwc` command
/// spells the same field lowercase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct DeviceStatus {
    #[serde(default, rename = "onOff")]
    pub on_off: u8,
    #[serde(default)]
    pub brightness: u8,
    #[serde(default)]
    pub color: Color,
    #[serde(default, rename = "ColorTemInKelvin")]
    pub color_tem_in_kelvin: u32,
}

/**
One Govee device reachable on the local network.

Identity is the `(sku, device)` pair plus the IP it currently answers on;
the power/brightness/color fields are cached observations, refreshed by
[`LocalDevice::update`] and updated optimistically by the command methods.
Equality and hashing ignore the cached state, since the device stays the
same while its state changes.
*/
#[derive(Derivative)]
#[derivative(PartialEq, Hash)]
#[derive(Debug, Clone, Serialize)]
pub struct LocalDevice {
    ip: Ipv4Addr,
    device: String,
    sku: String,

    #[serde(skip)]
    #[derivative(PartialEq = "ignore", Hash = "ignore")]
    device_port: u16,
    #[serde(skip)]
    #[derivative(PartialEq = "ignore", Hash = "ignore")]
    response_port: u16,
    #[serde(skip)]
    #[derivative(PartialEq = "ignore", Hash = "ignore")]
    reply_timeout: Duration,

    #[derivative(PartialEq = "ignore", Hash = "ignore")]
    on: bool,
    #[derivative(PartialEq = "ignore", Hash = "ignore")]
    brightness: u8,
    #[derivative(PartialEq = "ignore", Hash = "ignore")]
    color: Color,
    #[derivative(PartialEq = "ignore", Hash = "ignore")]
    color_tem: u32,
}

impl Eq for LocalDevice {}

impl fmt::Display for LocalDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<LocalDevice ip: {}, device: {}, sku: {}>",
            self.ip, self.device, self.sku
        )
    }
}

impl LocalDevice {
    pub fn new(ip: Ipv4Addr, device: impl Into<String>, sku: impl Into<String>) -> Self {
        LocalDevice {
            ip,
            device: device.into(),
            sku: sku.into(),
            device_port: DEVICE_PORT,
            response_port: RESPONSE_PORT,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            on: false,
            brightness: 0,
            color: Color::BLACK,
            color_tem: 0,
        }
    }

    pub(crate) fn from_scan(data: &ScanData, config: &DiscoveryConfig) -> Self {
        LocalDevice::new(data.ip, data.device.clone(), data.sku.clone())
            .with_ports(config.device_port, config.response_port)
            .with_reply_timeout(config.reply_timeout)
    }

    /// Overrides the control and response ports. Real devices always use
    /// 4003/4002; loopback test fixtures need ephemeral ports.
    pub fn with_ports(mut self, device_port: u16, response_port: u16) -> Self {
        self.device_port = device_port;
        self.response_port = response_port;
        self
    }

    pub fn with_reply_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    /// The vendor-assigned device address, distinct from the current IP.
    pub fn address(&self) -> &str {
        &self.device
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn is_on(&self) -> bool {
        self.on
    }

    pub fn brightness(&self) -> u8 {
        self.brightness
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn color_temperature(&self) -> u32 {
        self.color_tem
    }

    /**
    Sends one command datagram to the device's control port.

    A failed send is logged and treated as a lost command: the caller sees
    `Ok(None)`, never an error, and observes only stale state. With `listen`
    set, waits on the shared response port for a single decodable reply and
    returns its `msg.data`; `Ok(None)` then means the reply window elapsed.
    */
    pub async fn send_request(
        &self,
        command: &LocalCommand,
        listen: bool,
    ) -> anyhow::Result<Option<serde_json::Value>> {
        let payload = serde_json::to_vec(&RequestEnvelope { msg: command })?;
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .await
            .context("Failed to bind command socket")?;

        if let Err(e) = socket
            .send_to(&payload, (self.ip, self.device_port))
            .await
        {
            error!("Request to {}:{} failed: {}", self.ip, self.device_port, e);
            return Ok(None);
        }
        info!(
            "Request sent to {}:{}, {:?}",
            self.ip, self.device_port, command
        );

        if !listen {
            return Ok(None);
        }
        self.listen_for_response().await
    }

    /// Waits for a single reply datagram on the shared response port.
    ///
    /// Malformed JSON is logged and discarded without consuming the wait;
    /// the remaining window keeps shrinking until a decodable reply arrives
    /// or the timeout elapses.
    async fn listen_for_response(&self) -> anyhow::Result<Option<serde_json::Value>> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, self.response_port))
            .await
            .context("Failed to bind response socket")?;
        info!("Listening for response on port {}", self.response_port);

        let mut buffer = [0; 1024];
        let deadline = Instant::now() + self.reply_timeout;

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            match timeout(deadline - now, socket.recv_from(&mut buffer)).await {
                Ok(Ok((number_of_bytes, resp_addr))) => {
                    let received = &buffer[..number_of_bytes];
                    match serde_json::from_slice::<ResponseEnvelope>(received) {
                        Ok(envelope) => {
                            info!(
                                "Response from {}, cmd {:?}",
                                resp_addr, envelope.msg.cmd
                            );
                            return Ok(Some(envelope.msg.data));
                        }
                        Err(e) => error!("Error decoding reply JSON: {}", e),
                    }
                }
                Ok(Err(e)) => {
                    error!("Failed to receive response: {}", e);
                    return Ok(None);
                }
                Err(_) => return Ok(None),
            }
        }
    }

    pub async fn turn_on(&mut self) -> anyhow::Result<()> {
        self.send_request(&LocalCommand::Turn { value: 1 }, false)
            .await?;
        self.on = true;
        Ok(())
    }

    pub async fn turn_off(&mut self) -> anyhow::Result<()> {
        self.send_request(&LocalCommand::Turn { value: 0 }, false)
            .await?;
        self.on = false;
        Ok(())
    }

    /// Sets the brightness, wrapping the input modulo 101 into 0..=100.
    ///
    /// The protocol wraps rather than clamps, so `150` becomes `49`. The
    /// modulo is Euclidean, keeping negative inputs in range too.
    pub async fn set_brightness(&mut self, brightness: i32) -> anyhow::Result<()> {
        let value = brightness.rem_euclid(101) as u8;
        self.send_request(&LocalCommand::Brightness { value }, false)
            .await?;
        self.brightness = value;
        Ok(())
    }

    /// Sets color and white temperature in one `colorwc` command. Channels
    /// wrap modulo 256; the Kelvin value passes through unmodified.
    pub async fn set_color(
        &mut self,
        r: i32,
        g: i32,
        b: i32,
        temperature: u32,
    ) -> anyhow::Result<()> {
        let color = Color::new(r, g, b);
        self.send_request(
            &LocalCommand::ColorWc {
                color,
                color_tem_in_kelvin: temperature,
            },
            false,
        )
        .await?;
        self.color = color;
        self.color_tem = temperature;
        Ok(())
    }

    /// Queries the device state and refreshes the cached fields.
    ///
    /// A device that stays silent through the reply window is an explicit
    /// error, so callers can tell "device silent" from "state refreshed".
    pub async fn update(&mut self) -> anyhow::Result<()> {
        let data = match self
            .send_request(&LocalCommand::DevStatus {}, true)
            .await?
        {
            Some(data) => data,
            None => bail!(
                "No status reply from {} within {:?}",
                self.ip,
                self.reply_timeout
            ),
        };
        let status: DeviceStatus =
            serde_json::from_value(data).context("Failed to parse devStatus reply")?;
        self.apply_status(status);
        Ok(())
    }

    fn apply_status(&mut self, status: DeviceStatus) {
        self.on = status.on_off != 0;
        self.brightness = status.brightness;
        self.color = status.color;
        self.color_tem = status.color_tem_in_kelvin;
    }
}
