use crate::{
    hotspot::{ApplyRequest, Configuration, ProbeMode, StatusReport},
    response::{ServiceResultResponse, handle_service_result},
    services::{
        apply::{ApplyCoordinator, NetworkApplier, SettingsStore},
        devices::{DeviceEnumerator, DeviceListing},
        session_risk::SessionRiskDetector,
        status::{StatusProber, StatusSource},
    },
};
use actix_web::{HttpRequest, HttpResponse, Responder, web};
use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

#[derive(Deserialize)]
pub struct StatusQuery {
    #[serde(default)]
    mode: ProbeMode,
}

/// Everything the settings form needs to render
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsView {
    configuration: Configuration,
    devices: Option<DeviceListing>,
    status: Option<StatusReport>,
    /// Disruptive changes will ask for confirmation
    connected_through_hotspot: bool,
}

impl ServiceResultResponse for SettingsView {
    fn into_response(self) -> HttpResponse {
        HttpResponse::Ok().json(self)
    }
}

pub struct Api<Applier, Store, Source, Devices>
where
    Applier: NetworkApplier,
    Store: SettingsStore,
    Source: StatusSource,
    Devices: DeviceEnumerator,
{
    pub coordinator: ApplyCoordinator<Applier, Store, Source>,
    pub prober: StatusProber<Source, Store>,
    pub store: Arc<Store>,
    pub devices: Arc<Devices>,
    pub risk: SessionRiskDetector,
    pub trust_proxy_headers: bool,
}

impl<Applier, Store, Source, Devices> Clone for Api<Applier, Store, Source, Devices>
where
    Applier: NetworkApplier,
    Store: SettingsStore,
    Source: StatusSource,
    Devices: DeviceEnumerator,
{
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
            prober: self.prober.clone(),
            store: self.store.clone(),
            devices: self.devices.clone(),
            risk: self.risk.clone(),
            trust_proxy_headers: self.trust_proxy_headers,
        }
    }
}

impl<Applier, Store, Source, Devices> Api<Applier, Store, Source, Devices>
where
    Applier: NetworkApplier + Send + Sync + 'static,
    Store: SettingsStore + Send + Sync + 'static,
    Source: StatusSource + Send + Sync + 'static,
    Devices: DeviceEnumerator + Send + Sync + 'static,
{
    pub async fn settings(req: HttpRequest, api: web::Data<Self>) -> impl Responder {
        debug!("settings() called");

        let client = api.client_address(&req);
        handle_service_result(api.settings_view(client).await, "settings")
    }

    pub async fn apply_settings(
        req: HttpRequest,
        body: web::Json<ApplyRequest>,
        api: web::Data<Self>,
    ) -> impl Responder {
        debug!("apply_settings() called");

        let client = api.client_address(&req);
        if client.is_none() {
            warn!("client address unknown, treating session as connected through the hotspot");
        }

        api.coordinator
            .submit(body.into_inner(), client)
            .await
            .into_response()
    }

    pub async fn status(query: web::Query<StatusQuery>, api: web::Data<Self>) -> impl Responder {
        debug!("status() called: {}", query.mode);

        api.prober.probe(query.mode).await.into_response()
    }

    pub async fn devices(api: web::Data<Self>) -> impl Responder {
        debug!("devices() called");

        handle_service_result(api.device_listing().await, "devices")
    }

    pub async fn apply_history(api: web::Data<Self>) -> impl Responder {
        debug!("apply_history() called");

        api.coordinator.journal().records().into_response()
    }

    pub async fn version() -> impl Responder {
        HttpResponse::Ok().body(env!("CARGO_PKG_VERSION"))
    }

    async fn settings_view(&self, client: Option<IpAddr>) -> Result<SettingsView> {
        let configuration = self
            .store
            .load()
            .await
            .context("failed to load settings")?;

        let (devices, status) = tokio::join!(
            self.device_listing_for(&configuration),
            self.prober.probe(ProbeMode::Fast)
        );

        let devices = devices
            .inspect_err(|e| warn!("failed to list devices: {e:#}"))
            .ok();
        let status = status.inspect_err(|e| warn!("{e}")).ok();

        Ok(SettingsView {
            connected_through_hotspot: self
                .risk
                .is_possibly_self_connected(client, &configuration.radio),
            configuration,
            devices,
            status,
        })
    }

    async fn device_listing(&self) -> Result<DeviceListing> {
        let configuration = self
            .store
            .load()
            .await
            .context("failed to load settings")?;

        self.device_listing_for(&configuration).await
    }

    async fn device_listing_for(&self, configuration: &Configuration) -> Result<DeviceListing> {
        let devices = self
            .devices
            .list_wireless_devices()
            .await
            .context("failed to list wireless devices")?;

        Ok(DeviceListing::new(devices, configuration))
    }

    /// Address of the requesting client, forwarded headers only if trusted
    fn client_address(&self, req: &HttpRequest) -> Option<IpAddr> {
        if self.trust_proxy_headers {
            if let Some(addr) = req
                .connection_info()
                .realip_remote_addr()
                .and_then(parse_client_address)
            {
                return Some(addr);
            }
        }

        req.peer_addr().map(|addr| addr.ip())
    }
}

/// Parse `ip`, `ip:port` or `[ipv6]:port`
fn parse_client_address(value: &str) -> Option<IpAddr> {
    let value = value.trim();

    value
        .parse::<IpAddr>()
        .ok()
        .or_else(|| value.parse::<SocketAddr>().ok().map(|addr| addr.ip()))
        .or_else(|| {
            value
                .strip_prefix('[')
                .and_then(|v| v.strip_suffix(']'))
                .and_then(|v| v.parse().ok())
        })
}
