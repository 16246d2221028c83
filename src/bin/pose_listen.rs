//! pose_listen - print pose packets published by relayd

use anyhow::{Context, Result};
use clap::Parser;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};

use marker_relay::decode_packet;
use marker_relay::wire::MAX_UDP_PAYLOAD;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Address relayd publishes to (group:port for multicast).
    #[arg(long, env = "RELAY_UDP_TARGET", default_value = "224.0.0.69:7400")]
    target: SocketAddr,
    /// Stop after this many packets.
    #[arg(long)]
    count: Option<u64>,
    /// Target is a subnet broadcast address; listen on all interfaces.
    #[arg(long)]
    broadcast: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let socket = bind(&args.target, args.broadcast)?;
    log::info!("listening for pose packets on {}", args.target);

    let mut buf = vec![0u8; MAX_UDP_PAYLOAD];
    let mut received = 0u64;
    while args.count.map_or(true, |count| received < count) {
        let (len, from) = socket.recv_from(&mut buf).context("receive packet")?;
        match decode_packet(&buf[..len]) {
            Ok(packet) => {
                received += 1;
                println!(
                    "frame {} t={:.3}s from {}: {} marker(s)",
                    packet.frame_number,
                    packet.frame_time,
                    from,
                    packet.poses.len()
                );
                for (i, pose) in packet.poses.iter().enumerate() {
                    let [x, y, z] = pose.position;
                    let [qx, qy, qz, qw] = pose.rotation;
                    println!(
                        "  #{i}: pos=({x:.3}, {y:.3}, {z:.3}) rot=({qx:.3}, {qy:.3}, {qz:.3}, {qw:.3})"
                    );
                }
            }
            Err(err) => log::warn!("{} bytes from {}: {}", len, from, err),
        }
    }
    Ok(())
}

fn bind(target: &SocketAddr, broadcast: bool) -> Result<UdpSocket> {
    match target.ip() {
        IpAddr::V4(group) if group.is_multicast() => {
            let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, target.port()))
                .with_context(|| format!("bind udp port {}", target.port()))?;
            socket
                .join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)
                .with_context(|| format!("join multicast group {}", group))?;
            Ok(socket)
        }
        IpAddr::V6(group) if group.is_multicast() => {
            let socket = UdpSocket::bind((Ipv6Addr::UNSPECIFIED, target.port()))
                .with_context(|| format!("bind udp port {}", target.port()))?;
            socket
                .join_multicast_v6(&group, 0)
                .with_context(|| format!("join multicast group {}", group))?;
            Ok(socket)
        }
        IpAddr::V4(addr) if broadcast || addr.is_broadcast() => {
            UdpSocket::bind((Ipv4Addr::UNSPECIFIED, target.port()))
                .with_context(|| format!("bind udp port {}", target.port()))
        }
        _ => UdpSocket::bind(target).with_context(|| format!("bind udp {}", target)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subnet_broadcast_listens_on_every_interface() {
        let socket = bind(&"10.0.1.255:0".parse().unwrap(), true).unwrap();
        assert!(socket.local_addr().unwrap().ip().is_unspecified());
    }

    #[test]
    fn unicast_target_binds_that_address() {
        let socket = bind(&"127.0.0.1:0".parse().unwrap(), false).unwrap();
        assert_eq!(socket.local_addr().unwrap().ip(), Ipv4Addr::LOCALHOST);
    }
}
