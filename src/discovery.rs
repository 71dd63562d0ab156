//! Service discovery (part of C12). Advertises this instance over mDNS so
//! peer services can find the search API without a central registry — the
//! same `mdns_sd::ServiceDaemon` setup as the teacher's `mdns.rs`, with
//! capability flags in the TXT record instead of a static API path.

use std::collections::HashMap;

const SERVICE_TYPE: &str = "_sonet-search._tcp.local.";

pub struct MdnsHandle {
    daemon: mdns_sd::ServiceDaemon,
    fullname: String,
}

impl MdnsHandle {
    pub fn fullname(&self) -> &str {
        &self.fullname
    }
}

impl Drop for MdnsHandle {
    fn drop(&mut self) {
        let _ = self.daemon.unregister(&self.fullname);
        let _ = self.daemon.shutdown();
    }
}

/// Registers this instance for discovery, advertising the indices it
/// serves and whether real-time indexing is enabled.
pub fn start_mdns(port: u16, instance_name: &str, indices: &[&str], real_time_indexing: bool) -> Result<MdnsHandle, String> {
    let mdns = mdns_sd::ServiceDaemon::new().map_err(|e| format!("mDNS daemon: {e}"))?;

    let host = hostname::get().map(|h| h.to_string_lossy().into_owned()).unwrap_or_else(|_| "localhost".to_string());
    let host_fqdn = if host.ends_with(".local.") {
        host.clone()
    } else if host.ends_with(".local") {
        format!("{host}.")
    } else {
        format!("{host}.local.")
    };

    let ip = local_ip_address::local_ip().map(|ip| ip.to_string()).unwrap_or_else(|_| "127.0.0.1".to_string());

    let mut properties = HashMap::new();
    properties.insert("version".to_string(), env!("CARGO_PKG_VERSION").to_string());
    properties.insert("indices".to_string(), indices.join(","));
    properties.insert("real_time_indexing".to_string(), real_time_indexing.to_string());

    let service_info = mdns_sd::ServiceInfo::new(SERVICE_TYPE, instance_name, &host_fqdn, &ip, port, Some(properties))
        .map_err(|e| format!("mDNS service info: {e}"))?;

    let fullname = service_info.get_fullname().to_string();
    mdns.register(service_info).map_err(|e| format!("mDNS register: {e}"))?;

    Ok(MdnsHandle { daemon: mdns, fullname })
}

pub fn service_type() -> &'static str {
    SERVICE_TYPE
}
