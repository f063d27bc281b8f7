//! Hosted-file catalog across interfaces.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::errors::HostError;
use crate::server::HostServer;

/// One host server per interface IP; empty servers are removed.
///
/// Cloning shares the catalog, so the service can be handed to task workers.
#[derive(Clone)]
pub struct HostService {
    servers: Arc<Mutex<HashMap<String, HostServer>>>,
}

impl HostService {
    pub fn new() -> Self {
        Self {
            servers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Host `file_path` for `client` on the server bound to `iface_ip`,
    /// creating that server on demand.
    ///
    /// Returns the URL a renderer on that interface can fetch, of the form
    /// `http://<iface_ip>:<port>/rendererserviceupnp/<id><ext>`. Hosting the
    /// same file again returns the existing URL; the client is added to the
    /// file's client set if not already present.
    pub async fn add(
        &self,
        iface_ip: &str,
        client: &str,
        file_path: &str,
    ) -> Result<String, HostError> {
        let mut servers = self.servers.lock().await;

        let created = !servers.contains_key(iface_ip);
        if created {
            let server = HostServer::bind(iface_ip).await?;
            servers.insert(iface_ip.to_string(), server);
        }

        let server = servers
            .get(iface_ip)
            .expect("server inserted or already present");

        let registered = server.table.lock().add_file(client, file_path);

        match registered {
            Ok(url_path) => Ok(format!("http://{}:{}{}", iface_ip, server.port, url_path)),
            Err(e) => {
                // Never leave an empty server behind.
                if created {
                    if let Some(server) = servers.remove(iface_ip) {
                        server.close();
                    }
                }
                Err(e)
            }
        }
    }

    /// Drop `client` from the file's client set, cascading to the file and to
    /// the server when they become empty. False when the server, the file or
    /// the client registration cannot be found.
    pub async fn remove(&self, iface_ip: &str, client: &str, file_path: &str) -> bool {
        let mut servers = self.servers.lock().await;

        let Some(server) = servers.get(iface_ip) else {
            return false;
        };

        let server_empty = {
            let mut table = server.table.lock();

            let Some(file) = table.files.get_mut(file_path) else {
                return false;
            };

            if !file.remove_client(client) {
                return false;
            }

            if file.clients.is_empty() {
                table.files.remove(file_path);
            }

            table.files.is_empty()
        };

        if server_empty {
            debug!("last hosted file on {} removed, closing server", iface_ip);
            if let Some(server) = servers.remove(iface_ip) {
                server.close();
            }
        }

        true
    }

    /// A bus client disappeared: release every file it held, everywhere.
    pub async fn lost_client(&self, client: &str) {
        let mut servers = self.servers.lock().await;
        let mut empty_servers = Vec::new();

        for (iface_ip, server) in servers.iter() {
            let mut table = server.table.lock();

            // Collect then delete, the map cannot be mutated mid-iteration.
            let doomed: Vec<String> = table
                .files
                .iter_mut()
                .filter_map(|(source, file)| {
                    if !file.remove_client(client) {
                        return None;
                    }
                    file.clients.is_empty().then(|| source.clone())
                })
                .collect();

            for source in doomed {
                table.files.remove(&source);
            }

            if table.files.is_empty() {
                empty_servers.push(iface_ip.clone());
            }
        }

        for iface_ip in empty_servers {
            debug!("client {} held the last files on {}", client, iface_ip);
            if let Some(server) = servers.remove(&iface_ip) {
                server.close();
            }
        }
    }

    /// Number of live servers, for teardown checks.
    pub async fn server_count(&self) -> usize {
        self.servers.lock().await.len()
    }

    /// Close every server.
    pub async fn shutdown(&self) {
        let mut servers = self.servers.lock().await;
        for (_, server) in servers.drain() {
            server.close();
        }
    }
}

impl Default for HostService {
    fn default() -> Self {
        Self::new()
    }
}
