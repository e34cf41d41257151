use std::net::Ipv4Addr;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};

use govee_control_lib::cloud_interface::{CloudClient, CloudDevice, DeviceKind};
use govee_control_lib::local_interface::LocalDevice;
use govee_control_lib::util::color::Color;
use govee_control_lib::util::discovery::Discovery;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    handle_cli(cli).await
}

/// This struct defines the command line interface of the application
#[derive(Parser)]
#[clap(
    name = "govee_control",
    about = "Controls Govee smart lights and appliances",
    version = "0.2.0"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

/// Supported output formats for the `discover` and `list-devices` commands.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum OutputFormat {
    /// Plain text format.
    Plaintext,
    /// JSON format.
    Json,
    /// YAML format.
    Yaml,
}

/// Subcommands available for the CLI
#[derive(Subcommand)]
pub enum Commands {
    /// Scan the local network for Govee devices
    #[clap(name = "discover")]
    Discover {
        /// Output format (plaintext, json, yaml)
        #[clap(short, long, value_enum, default_value_t = OutputFormat::Plaintext)]
        output: OutputFormat,

        /// Scan window in milliseconds
        #[clap(short = 't', long = "timeout", default_value_t = 5000)]
        timeout: u64,
    },
    /// Control one device over the local UDP protocol
    #[clap(name = "device-call")]
    DeviceCall {
        /// Sets the IP address of the Govee device
        #[clap(long)]
        ip: Ipv4Addr,

        /// The device address, if known (shown by `discover`)
        #[clap(long, default_value = "")]
        address: String,

        /// The device SKU, if known (shown by `discover`)
        #[clap(long, default_value = "")]
        sku: String,

        #[clap(subcommand)]
        action: DeviceAction,
    },
    /// Control devices through the Govee cloud REST API
    #[clap(name = "cloud")]
    Cloud {
        /// The Govee developer API key; falls back to GOVEE_API_KEY
        #[clap(long)]
        api_key: Option<String>,

        #[clap(subcommand)]
        action: CloudAction,
    },
}

/// Actions available under the `device-call` subcommand
#[derive(Subcommand)]
pub enum DeviceAction {
    /// Turns the device on.
    #[clap(name = "turn-on")]
    TurnOn,
    /// Turns the device off.
    #[clap(name = "turn-off")]
    TurnOff,
    /// Sets the brightness (0-100; out-of-range values wrap).
    #[clap(name = "set-brightness")]
    SetBrightness {
        brightness: i32,
    },
    /// Sets the color and optionally the white temperature.
    #[clap(name = "set-color")]
    SetColor {
        /// Red component of the color (0-255)
        #[clap(short = 'r', long = "red")]
        red: i32,

        /// Green component of the color (0-255)
        #[clap(short = 'g', long = "green")]
        green: i32,

        /// Blue component of the color (0-255)
        #[clap(short = 'b', long = "blue")]
        blue: i32,

        /// White temperature in Kelvin
        #[clap(long, default_value_t = 0)]
        temperature: u32,
    },
    /// Queries the device state and prints it.
    #[clap(name = "status")]
    Status,
}

/// Actions available under the `cloud` subcommand
#[derive(Subcommand)]
pub enum CloudAction {
    /// Lists the account's devices.
    #[clap(name = "list-devices")]
    ListDevices {
        /// Output format (plaintext, json, yaml)
        #[clap(short, long, value_enum, default_value_t = OutputFormat::Plaintext)]
        output: OutputFormat,
    },
    /// Turns a device on.
    #[clap(name = "turn-on")]
    TurnOn {
        #[clap(flatten)]
        target: CloudTarget,
    },
    /// Turns a device off.
    #[clap(name = "turn-off")]
    TurnOff {
        #[clap(flatten)]
        target: CloudTarget,
    },
    /// Sets the brightness (0-100).
    #[clap(name = "set-brightness")]
    SetBrightness {
        #[clap(flatten)]
        target: CloudTarget,

        brightness: u8,
    },
    /// Sets the color.
    #[clap(name = "set-color")]
    SetColor {
        #[clap(flatten)]
        target: CloudTarget,

        /// Red component of the color (0-255)
        #[clap(short = 'r', long = "red")]
        red: u8,

        /// Green component of the color (0-255)
        #[clap(short = 'g', long = "green")]
        green: u8,

        /// Blue component of the color (0-255)
        #[clap(short = 'b', long = "blue")]
        blue: u8,
    },
    /// Fetches and prints a device's state.
    #[clap(name = "state")]
    State {
        #[clap(flatten)]
        target: CloudTarget,
    },
}

/// Identifies one device to the cloud control endpoints.
#[derive(clap::Args)]
pub struct CloudTarget {
    /// The device address, as shown by `list-devices`
    #[clap(long)]
    device: String,

    /// The device model, e.g. H6159
    #[clap(long)]
    model: String,

    /// Which control endpoint the device answers on
    #[clap(long, value_enum, default_value_t = DeviceKind::Light)]
    kind: DeviceKind,
}

impl CloudTarget {
    fn into_device(self) -> CloudDevice {
        CloudDevice::new(self.device, self.model, self.kind)
    }
}

fn resolve_api_key(api_key: Option<String>) -> Result<String> {
    match api_key {
        Some(key) => Ok(key),
        None => std::env::var("GOVEE_API_KEY")
            .map_err(|_| anyhow!("No API key given and GOVEE_API_KEY is not set")),
    }
}

async fn handle_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Discover { output, timeout } => {
            let registry = Discovery::find_devices(Duration::from_millis(timeout)).await?;
            match output {
                OutputFormat::Plaintext => {
                    Discovery::pretty_print_devices(&registry);
                }
                OutputFormat::Json => {
                    let json = serde_json::to_string(registry.devices())?;
                    println!("{}", json);
                }
                OutputFormat::Yaml => {
                    let yaml = serde_yaml::to_string(registry.devices())?;
                    println!("{}", yaml);
                }
            }
        }
        Commands::DeviceCall {
            ip,
            address,
            sku,
            action,
        } => {
            let mut device = LocalDevice::new(ip, address, sku);

            match action {
                DeviceAction::TurnOn => {
                    device.turn_on().await?;
                    println!("Device turned on");
                }
                DeviceAction::TurnOff => {
                    device.turn_off().await?;
                    println!("Device turned off");
                }
                DeviceAction::SetBrightness { brightness } => {
                    device.set_brightness(brightness).await?;
                    println!("Brightness set to {}", device.brightness());
                }
                DeviceAction::SetColor {
                    red,
                    green,
                    blue,
                    temperature,
                } => {
                    device.set_color(red, green, blue, temperature).await?;
                    println!(
                        "Color set to {}, temperature {} K",
                        device.color(),
                        device.color_temperature()
                    );
                }
                DeviceAction::Status => {
                    device.update().await?;
                    println!("Power: {}", if device.is_on() { "on" } else { "off" });
                    println!("Brightness: {}", device.brightness());
                    println!("Color: {}", device.color());
                    println!("Color temperature: {} K", device.color_temperature());
                }
            }
        }
        Commands::Cloud { api_key, action } => {
            let key = resolve_api_key(api_key)?;
            let mut client = CloudClient::new(key);

            match action {
                CloudAction::ListDevices { output } => {
                    let devices = client.get_devices(true).await?;
                    match output {
                        OutputFormat::Plaintext => {
                            for device in devices {
                                println!(
                                    "{}  model: {}  device: {}  controllable: {}",
                                    device.name, device.model, device.device, device.controllable
                                );
                            }
                        }
                        OutputFormat::Json => {
                            let json = serde_json::to_string(devices)?;
                            println!("{}", json);
                        }
                        OutputFormat::Yaml => {
                            let yaml = serde_yaml::to_string(devices)?;
                            println!("{}", yaml);
                        }
                    }
                }
                CloudAction::TurnOn { target } => {
                    let mut device = target.into_device();
                    client.turn_on(&mut device).await?;
                    println!("Device turned on");
                }
                CloudAction::TurnOff { target } => {
                    let mut device = target.into_device();
                    client.turn_off(&mut device).await?;
                    println!("Device turned off");
                }
                CloudAction::SetBrightness { target, brightness } => {
                    let mut device = target.into_device();
                    client.set_brightness(&mut device, brightness).await?;
                    println!("Brightness set to {}", brightness);
                }
                CloudAction::SetColor {
                    target,
                    red,
                    green,
                    blue,
                } => {
                    let mut device = target.into_device();
                    let color = Color::from((red, green, blue));
                    client.set_color(&mut device, color).await?;
                    println!("Color set to {}", color);
                }
                CloudAction::State { target } => {
                    let device = target.into_device();
                    let state = client.get_device_state(&device).await?;
                    println!("Online: {}", state.online);
                    println!("Power: {}", state.power);
                    println!("Brightness: {}", state.brightness);
                    println!("Color: {}", state.color);
                    println!("Color temperature: {} K", state.color_tem);
                }
            }
        }
    }

    Ok(())
}
