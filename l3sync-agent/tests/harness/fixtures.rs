//! Router descriptor builders.

use std::net::IpAddr;

use l3sync::model::{FloatingIp, Port, Route, RouterDescriptor};

pub fn router(id: &str, internal_ports: &[&str]) -> RouterDescriptor {
    let mut router = RouterDescriptor::new(id);
    router.interfaces = internal_ports
        .iter()
        .map(|port| Port::new(*port, format!("net-{}", port)))
        .collect();
    router
}

pub fn with_gateway(mut router: RouterDescriptor, port_id: &str) -> RouterDescriptor {
    let port = Port::new(port_id, "ext-net");
    router.gw_ports = vec![port.clone()];
    router.gw_port = Some(port);
    router
}

pub fn with_floating_ips(mut router: RouterDescriptor, addresses: &[&str]) -> RouterDescriptor {
    router.floating_ips = addresses
        .iter()
        .enumerate()
        .map(|(i, addr)| FloatingIp {
            id: format!("fip-{}", i),
            floating_ip_address: addr.parse::<IpAddr>().unwrap(),
            fixed_ip_address: None,
            port_id: None,
        })
        .collect();
    router
}

pub fn with_route(mut router: RouterDescriptor, destination: &str, nexthop: &str) -> RouterDescriptor {
    router.routes.push(Route {
        destination: destination.parse().unwrap(),
        nexthop: nexthop.parse().unwrap(),
    });
    router
}

pub fn admin_down(mut router: RouterDescriptor) -> RouterDescriptor {
    router.admin_state_up = false;
    router
}

pub fn hosted_on(mut router: RouterDescriptor, device: &str) -> RouterDescriptor {
    router.hosting_device = Some(device.to_string());
    router
}

pub fn ids(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|id| id.to_string()).collect()
}
