//! `gevcamd` runs the camera endpoint with the built-in test-pattern
//! sensor. Real deployments swap the camera for a hardware driver and keep
//! everything else.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::Parser;
use log::info;

use gevcam::bootstrap::{DeviceIdentity, LinkInfo};
use gevcam::endpoint::{Endpoint, EndpointConfig};
use gevcam::settings::JsonFileStore;
use gevcam::{TestPatternCamera, protocol};

#[derive(Parser, Debug)]
#[command(name = "gevcamd", version, about = "GigE-Vision-compatible camera endpoint")]
struct Args {
    /// Address reported as the device IP (bootstrap current-IP cell).
    #[arg(long, default_value = "192.168.1.100")]
    ip: Ipv4Addr,

    /// Subnet mask for the reported address.
    #[arg(long, default_value = "255.255.255.0")]
    netmask: Ipv4Addr,

    /// Default gateway for the reported address.
    #[arg(long, default_value = "192.168.1.1")]
    gateway: Ipv4Addr,

    /// Device MAC, colon-separated.
    #[arg(long, default_value = "02:00:00:C0:FF:EE", value_parser = parse_mac)]
    mac: [u8; 6],

    /// GVCP control port.
    #[arg(long, default_value_t = protocol::gvcp::GVCP_PORT)]
    control_port: u16,

    /// GVSP stream port.
    #[arg(long, default_value_t = protocol::gvsp::GVSP_PORT)]
    stream_port: u16,

    /// Test-pattern sensor width.
    #[arg(long, default_value_t = 320)]
    width: u32,

    /// Test-pattern sensor height.
    #[arg(long, default_value_t = 240)]
    height: u32,

    /// Where sensor parameters persist.
    #[arg(long, default_value = "gevcam-settings.json")]
    settings: PathBuf,
}

fn parse_mac(s: &str) -> Result<[u8; 6], String> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 6 {
        return Err(format!("expected six colon-separated octets, got {}", parts.len()));
    }
    let mut mac = [0u8; 6];
    for (slot, part) in mac.iter_mut().zip(parts) {
        *slot = u8::from_str_radix(part, 16).map_err(|e| format!("bad octet {part:?}: {e}"))?;
    }
    Ok(mac)
}

fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = EndpointConfig {
        link: LinkInfo {
            mac: args.mac,
            ip: args.ip,
            netmask: args.netmask,
            gateway: args.gateway,
        },
        identity: DeviceIdentity::default(),
        control_port: args.control_port,
        stream_port: args.stream_port,
        ..Default::default()
    };

    let endpoint = Endpoint::new(
        config,
        Box::new(TestPatternCamera::new(args.width, args.height)),
        Box::new(JsonFileStore::new(args.settings)),
    )?;
    info!(
        "gevcam endpoint ready (control {}, stream {})",
        endpoint.control_port(),
        args.stream_port
    );
    endpoint.run();
    Ok(())
}
