//! Zero-configuration peer discovery over mDNS. A Node Manager advertises
//! itself; a Master subscribes and learns about Node Managers as they come
//! and go on the local network.

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tracing::{debug, info, warn};

const SERVICE_TYPE: &str = "_nodemanager._tcp.local.";

/// A Node Manager discovered on the network, as handed to the callback a
/// [`subscribe`] caller installs.
#[derive(Debug, Clone)]
pub struct DiscoveredPeer {
    pub host: String,
    pub port: u16,
}

/// An active mDNS advertisement. Dropping it unregisters the service and
/// shuts the background daemon thread down.
pub struct Advertisement {
    daemon: ServiceDaemon,
    fullname: String,
}

impl Drop for Advertisement {
    fn drop(&mut self) {
        if let Err(e) = self.daemon.unregister(&self.fullname) {
            warn!(error = %e, "failed to unregister mdns advertisement");
        }
    }
}

/// Advertise `(service="NodeManager", host, port)` on the local network.
pub fn advertise(host: &str, port: u16) -> mdns_sd::Result<Advertisement> {
    let daemon = ServiceDaemon::new()?;
    let instance_name = format!("node-manager-{port}");
    let host_name = format!("{host}.local.");
    let properties = [("service", "NodeManager")];
    let info = ServiceInfo::new(SERVICE_TYPE, &instance_name, &host_name, host, port, &properties[..])?;
    let fullname = info.get_fullname().to_string();
    daemon.register(info)?;
    info!(host, port, "advertising node manager on the local network");
    Ok(Advertisement { daemon, fullname })
}

/// Subscribe to Node Manager additions/removals, invoking `on_add`/`on_remove`
/// as peers are resolved and as they drop off the network. Runs the mDNS
/// receive loop on a dedicated blocking thread, since `mdns-sd` hands events
/// back over a `std::sync::mpsc::Receiver`, not an async channel.
pub fn subscribe(
    on_add: impl Fn(DiscoveredPeer) + Send + 'static,
    on_remove: impl Fn(String) + Send + 'static,
) -> mdns_sd::Result<tokio::task::JoinHandle<()>> {
    let daemon = ServiceDaemon::new()?;
    let receiver = daemon.browse(SERVICE_TYPE)?;

    let handle = tokio::task::spawn_blocking(move || {
        // Keep `daemon` alive for the lifetime of the loop; dropping it
        // would tear down the background resolver this receiver reads from.
        let _daemon = daemon;
        while let Ok(event) = receiver.recv() {
            match event {
                ServiceEvent::ServiceResolved(info) => {
                    let Some(addr) = info.get_addresses().iter().next() else { continue };
                    let peer = DiscoveredPeer { host: addr.to_string(), port: info.get_port() };
                    debug!(host = %peer.host, port = peer.port, "node manager discovered");
                    on_add(peer);
                }
                ServiceEvent::ServiceRemoved(_ty, fullname) => {
                    debug!(fullname, "node manager left the network");
                    on_remove(fullname);
                }
                _ => {}
            }
        }
    });

    Ok(handle)
}
