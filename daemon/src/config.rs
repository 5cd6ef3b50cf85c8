//! On-disk daemon configuration, loaded via `confy` (spec §6 "Persisted
//! state layout"). Mirrors the teacher's `HttpServer`/`TcpServer`/
//! `StaticDevice` shape, adapted from "which MiniDSP to dial" to "where to
//! bind and which descriptor lists to track."

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub http_server: Option<HttpServer>,

    /// If set, also serves the RPC surface over a Unix domain socket.
    pub unix_socket_path: Option<String>,

    pub descriptors: DescriptorSources,

    /// Overrides the watchdog's default 60s scan interval, in seconds.
    pub watchdog_scan_interval_secs: Option<u64>,

    /// Directory holding the devices database, descriptor lists and
    /// property file. Defaults to the platform config dir under
    /// `confy`'s app name if unset.
    pub state_dir: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_server: Some(HttpServer {
                bind_address: Some("0.0.0.0:5480".to_string()),
            }),
            unix_socket_path: Some("/tmp/gatewayd.sock".to_string()),
            descriptors: DescriptorSources::default(),
            watchdog_scan_interval_secs: None,
            state_dir: None,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpServer {
    pub bind_address: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptorSources {
    /// URL of the allow-list descriptor file. `"http://toBeReplaced"` or a
    /// URL shorter than 9 chars both mean "no list" (spec §4.D).
    pub allow_list_url: Option<String>,
    pub deny_list_url: Option<String>,
}
