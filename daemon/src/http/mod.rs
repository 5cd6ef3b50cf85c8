//! The RPC surface (spec §6 "minimum"): resource read/write/execute, device
//! and endpoint listing, properties, metadata, descriptor reprocessing,
//! discovery control, resource mode changes, runtime stats, and the radio
//! subsystem surface.
//!
//! Grounded on the teacher's `daemon::http::mod` (`routerify::Router`
//! builder, `err_handler`, `tcp_main`/`unix_main`/`main` triplet) with the
//! MiniDSP-specific routes replaced by this daemon's device-graph surface.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use futures::future::join_all;
use gateway_core::descriptor::ListKind;
use gateway_core::model::{ResourceMode, Uri};
use hyper::{Body, Request, Response, Server, StatusCode};
use routerify::{Router, RouterService};
use serde::{Deserialize, Serialize};

use crate::app::APP;
use crate::config::HttpServer;

mod error;
mod helpers;
#[cfg(feature = "schemars")]
mod openapi;

pub use error::{Error, FormattedError};
use helpers::{param, parse_body, query_param, serialize_response, wildcard_uri};

#[derive(Debug, Deserialize)]
struct ValueBody {
    value: String,
}

#[derive(Debug, Deserialize)]
struct ArgumentBody {
    #[serde(default)]
    argument: String,
}

#[derive(Debug, Deserialize)]
struct ModeBody {
    mode: u8,
}

#[derive(Debug, Deserialize)]
struct MetadataBody {
    name: String,
    value: String,
}

#[derive(Debug, Serialize)]
struct ValueResponse {
    value: String,
}

async fn read_resource(req: Request<Body>) -> Result<Response<Body>, Error> {
    let uri = wildcard_uri(&req, "uri")?;
    let app = APP.get().ok_or(Error::ApplicationStillInitializing)?.read().await;
    let value = app.store.read_resource(&uri).await?;
    serialize_response(ValueResponse { value })
}

async fn write_resource(mut req: Request<Body>) -> Result<Response<Body>, Error> {
    let uri = wildcard_uri(&req, "uri")?;
    let body: ValueBody = parse_body(&mut req).await?;
    let app = APP.get().ok_or(Error::ApplicationStillInitializing)?.read().await;
    app.store.write_resource(&uri, &body.value).await?;
    serialize_response(())
}

async fn execute_resource(mut req: Request<Body>) -> Result<Response<Body>, Error> {
    let uri = wildcard_uri(&req, "uri")?;
    let body: ArgumentBody = parse_body(&mut req).await?;
    let app = APP.get().ok_or(Error::ApplicationStillInitializing)?.read().await;
    let result = app.store.execute_resource(&uri, &body.argument).await?;
    serialize_response(ValueResponse { value: result })
}

async fn change_resource_mode(mut req: Request<Body>) -> Result<Response<Body>, Error> {
    let uri = wildcard_uri(&req, "uri")?;
    let body: ModeBody = parse_body(&mut req).await?;
    let mode = ResourceMode::from_bits_truncate(body.mode);
    let app = APP.get().ok_or(Error::ApplicationStillInitializing)?.read().await;
    app.store.change_resource_mode(&uri, mode).await?;
    serialize_response(())
}

async fn list_devices(req: Request<Body>) -> Result<Response<Body>, Error> {
    let app = APP.get().ok_or(Error::ApplicationStillInitializing)?.read().await;
    let devices = match (query_param(&req, "class"), query_param(&req, "subsystem")) {
        (Some(class), _) => app.store.get_by_class(&class).await,
        (None, Some(subsystem)) => app.store.get_by_subsystem(&subsystem).await,
        (None, None) => app.store.get_all().await,
    };
    serialize_response(devices)
}

async fn get_device(req: Request<Body>) -> Result<Response<Body>, Error> {
    let uuid = param(&req, "uuid")?;
    let app = APP.get().ok_or(Error::ApplicationStillInitializing)?.read().await;
    let device = app.store.get_by_uri(&Uri::device(uuid)).await?;
    serialize_response(device)
}

async fn list_endpoints(req: Request<Body>) -> Result<Response<Body>, Error> {
    let uuid = param(&req, "uuid")?;
    let profile = query_param(&req, "profile");
    let app = APP.get().ok_or(Error::ApplicationStillInitializing)?.read().await;
    let device = app.store.get_by_uri(&Uri::device(uuid)).await?;
    let endpoints: Vec<_> = device
        .enabled_endpoints()
        .filter(|e| profile.as_deref().map(|p| p == e.profile).unwrap_or(true))
        .cloned()
        .collect();
    serialize_response(endpoints)
}

async fn remove_device(req: Request<Body>) -> Result<Response<Body>, Error> {
    let uuid = param(&req, "uuid")?;
    let app = APP.get().ok_or(Error::ApplicationStillInitializing)?.read().await;
    app.lifecycle.remove_device(uuid).await?;
    serialize_response(())
}

async fn get_metadata(req: Request<Body>) -> Result<Response<Body>, Error> {
    let uri = wildcard_uri(&req, "uri")?;
    let name = query_param(&req, "name").ok_or_else(|| Error::BadParam("name".to_string()))?;
    let app = APP.get().ok_or(Error::ApplicationStillInitializing)?.read().await;
    let value = app.store.get_metadata(&uri, &name).await?;
    serialize_response(ValueResponse { value })
}

async fn set_metadata(mut req: Request<Body>) -> Result<Response<Body>, Error> {
    let uri = wildcard_uri(&req, "uri")?;
    let body: MetadataBody = parse_body(&mut req).await?;
    let app = APP.get().ok_or(Error::ApplicationStillInitializing)?.read().await;
    app.store.set_metadata(&uri, &body.name, &body.value).await?;
    serialize_response(())
}

async fn get_property(req: Request<Body>) -> Result<Response<Body>, Error> {
    let key = param(&req, "key")?;
    let app = APP.get().ok_or(Error::ApplicationStillInitializing)?.read().await;
    let value = app.properties.get(key).await.ok_or_else(|| Error::Core(gateway_core::error::CoreError::not_found(key)))?;
    serialize_response(ValueResponse { value })
}

async fn set_property(mut req: Request<Body>) -> Result<Response<Body>, Error> {
    let key = param(&req, "key")?.to_string();
    let body: ValueBody = parse_body(&mut req).await?;
    let app = APP.get().ok_or(Error::ApplicationStillInitializing)?.read().await;
    app.set_property(&key, body.value, "rpc").await?;
    serialize_response(())
}

#[derive(Debug, Deserialize)]
struct DescriptorSourceBody {
    kind: String,
    url: String,
}

async fn reprocess_descriptors(mut req: Request<Body>) -> Result<Response<Body>, Error> {
    let body: DescriptorSourceBody = parse_body(&mut req).await?;
    let kind = match body.kind.as_str() {
        "allow" | "whitelist" => ListKind::Allow,
        "deny" | "blacklist" => ListKind::Deny,
        other => return Err(Error::BadParam(format!("unknown descriptor kind {other}"))),
    };
    let app = APP.get().ok_or(Error::ApplicationStillInitializing)?.read().await;
    app.descriptors.assign_url(kind, body.url).await;
    serialize_response(())
}

async fn start_discovery(req: Request<Body>) -> Result<Response<Body>, Error> {
    let class = param(&req, "class")?.to_string();
    let timeout_secs: u64 = query_param(&req, "timeoutSecs")
        .and_then(|s| s.parse().ok())
        .unwrap_or(30);

    let app_handle = APP.get().ok_or(Error::ApplicationStillInitializing)?.clone();
    {
        let app = app_handle.read().await;
        if !app.ready_for_devices() {
            return Err(Error::Core(gateway_core::error::CoreError::ServiceDisabled(
                "discovery is gated until the allow-list completes its first successful pass".into(),
            )));
        }
        let mut active = app.discovery_active.write().await;
        if active.contains(&class) {
            return Err(Error::Core(gateway_core::error::CoreError::not_allowed(
                Uri::from(format!("/discovery/{class}")),
                "discovery already active for this class",
            )));
        }
        active.insert(class.clone());
        drop(active);

        for driver in app.registry.read().await.drivers_for_class(&class) {
            driver.discover_devices(&class).await;
        }
    }

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(timeout_secs)).await;
        let app = app_handle.read().await;
        for driver in app.registry.read().await.drivers_for_class(&class) {
            driver.stop_discovering(Some(&class)).await;
        }
        app.discovery_active.write().await.remove(&class);
    });

    serialize_response(())
}

async fn stop_discovery(req: Request<Body>) -> Result<Response<Body>, Error> {
    let class = param(&req, "class")?.to_string();
    let app = APP.get().ok_or(Error::ApplicationStillInitializing)?.read().await;
    for driver in app.registry.read().await.drivers_for_class(&class) {
        driver.stop_discovering(Some(&class)).await;
    }
    app.discovery_active.write().await.remove(&class);
    serialize_response(())
}

async fn discovery_active(req: Request<Body>) -> Result<Response<Body>, Error> {
    let class = query_param(&req, "class");
    let app = APP.get().ok_or(Error::ApplicationStillInitializing)?.read().await;
    let active = app.discovery_active.read().await;
    let result = match class {
        Some(class) => active.contains(&class),
        None => !active.is_empty(),
    };
    serialize_response(result)
}

async fn runtime_stats(_req: Request<Body>) -> Result<Response<Body>, Error> {
    let app = APP.get().ok_or(Error::ApplicationStillInitializing)?.read().await;
    let mut stats = serde_json::Map::new();
    for driver in app.registry.read().await.all() {
        stats.insert(driver.name().to_string(), driver.fetch_runtime_stats().await);
    }
    serialize_response(serde_json::Value::Object(stats))
}

async fn radio_status(_req: Request<Body>) -> Result<Response<Body>, Error> {
    let app = APP.get().ok_or(Error::ApplicationStillInitializing)?.read().await;
    let status = app.radio.status().await?;
    serialize_response(status)
}

async fn radio_network_map(_req: Request<Body>) -> Result<Response<Body>, Error> {
    let app = APP.get().ok_or(Error::ApplicationStillInitializing)?.read().await;
    let map = app.radio.network_map().await?;
    serialize_response(map)
}

async fn radio_firmware_version(_req: Request<Body>) -> Result<Response<Body>, Error> {
    let app = APP.get().ok_or(Error::ApplicationStillInitializing)?.read().await;
    let version = app.radio.firmware_version().await?;
    serialize_response(ValueResponse { value: version })
}

async fn radio_energy_scan(_req: Request<Body>) -> Result<Response<Body>, Error> {
    let app = APP.get().ok_or(Error::ApplicationStillInitializing)?.read().await;
    let scan = app.radio.energy_scan().await?;
    serialize_response(scan)
}

async fn radio_lpm_enter(_req: Request<Body>) -> Result<Response<Body>, Error> {
    let app = APP.get().ok_or(Error::ApplicationStillInitializing)?.read().await;
    app.radio.enter_low_power_mode().await?;
    serialize_response(())
}

async fn radio_lpm_exit(_req: Request<Body>) -> Result<Response<Body>, Error> {
    let app = APP.get().ok_or(Error::ApplicationStillInitializing)?.read().await;
    app.radio.exit_low_power_mode().await?;
    serialize_response(())
}

async fn error_handler(err: routerify::RouteError) -> Response<Body> {
    let error = if let Some(err) = err.downcast_ref::<Error>() {
        let status = error::status_for(err);
        let formatted: FormattedError = err.clone().into();
        let body = serde_json::to_string_pretty(&formatted).unwrap_or_else(|e| {
            format!("the error: '{formatted:?}' couldn't be serialized as json: {e:?}")
        });
        return Response::builder()
            .status(status)
            .body(Body::from(body))
            .unwrap();
    } else {
        format!("Something went wrong: {err}")
    };

    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .body(Body::from(error))
        .unwrap()
}

fn router() -> Router<Body, Error> {
    let builder = Router::builder()
        .middleware(routerify_query::query_parser())
        .get("/resources/*uri", read_resource)
        .put("/resources/*uri", write_resource)
        .post("/resources/*uri/execute", execute_resource)
        .put("/resources/*uri/mode", change_resource_mode)
        .get("/devices", list_devices)
        .get("/devices/:uuid", get_device)
        .delete("/devices/:uuid", remove_device)
        .get("/devices/:uuid/endpoints", list_endpoints)
        .get("/metadata/*uri", get_metadata)
        .put("/metadata/*uri", set_metadata)
        .get("/properties/:key", get_property)
        .put("/properties/:key", set_property)
        .post("/descriptors/reprocess", reprocess_descriptors)
        .post("/discovery/:class/start", start_discovery)
        .post("/discovery/:class/stop", stop_discovery)
        .get("/discovery/active", discovery_active)
        .get("/stats", runtime_stats)
        .get("/radio/status", radio_status)
        .get("/radio/networkMap", radio_network_map)
        .get("/radio/firmwareVersion", radio_firmware_version)
        .get("/radio/energyScan", radio_energy_scan)
        .post("/radio/lpm/enter", radio_lpm_enter)
        .post("/radio/lpm/exit", radio_lpm_exit);

    #[cfg(feature = "schemars")]
    let builder = builder
        .get("/devices/get.schema", openapi::device_schema)
        .get("/devices/:uuid/endpoints/get.schema", openapi::endpoint_schema)
        .get("/resources/get.schema", openapi::resource_schema)
        .get("/errors/get.schema", openapi::error_schema);

    builder
        .err_handler(error_handler)
        .build()
        .expect("could not build http router")
}

pub async fn tcp_main(bind_address: String) -> anyhow::Result<()> {
    let rt = router();
    let service = RouterService::new(rt).expect("while building router service");
    let addr = SocketAddr::from_str(&bind_address)?;
    let server = Server::try_bind(&addr)?.serve(service);

    log::info!("HTTP surface listening on {addr}");
    if let Err(err) = server.await {
        log::error!("HTTP/TCP listener error: {err:?}");
        return Err(err.into());
    }
    Ok(())
}

#[cfg(target_family = "unix")]
pub async fn unix_main(path: String) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    use hyperlocal::UnixServerExt;
    use routerify_unixsocket::UnixRouterService;

    let service = UnixRouterService::new(router()).expect("while building router service");

    let path = Path::new(&path);
    if path.exists() {
        std::fs::remove_file(path).context("deleting existing unix socket file")?;
    }

    let server = Server::bind_unix(path).context("couldn't bind unix socket")?.serve(service);

    let metadata = std::fs::metadata(path).context("cannot get unix socket file metadata")?;
    let mut perms = metadata.permissions();
    perms.set_mode(0o766);
    std::fs::set_permissions(path, perms).context("couldn't set unix socket file permissions")?;

    log::info!("HTTP surface listening on unix socket {}", path.to_string_lossy());
    if let Err(err) = server.await {
        log::error!("HTTP/Unix listener error: {err:?}");
    }
    Ok(())
}

pub async fn main(http: Option<HttpServer>, unix_socket_path: Option<String>) -> anyhow::Result<()> {
    let mut futs = Vec::with_capacity(2);

    if let Some(server) = http {
        let bind_address = server.bind_address.unwrap_or_else(|| "0.0.0.0:5480".to_string());
        futs.push(tokio::spawn(async move { tcp_main(bind_address).await }));
    }

    #[cfg(target_family = "unix")]
    if let Some(path) = unix_socket_path {
        futs.push(tokio::spawn(async move { unix_main(path).await }));
    }

    #[cfg(not(target_family = "unix"))]
    let _ = unix_socket_path;

    for result in join_all(futs).await {
        if let Err(e) = result.context("server task panicked")? {
            log::error!("server exited with error: {e:?}");
        }
    }

    Ok(())
}
