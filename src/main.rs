use actix_server::ServerHandle;
use actix_web::{
    App, HttpServer,
    web::{self, Data},
};
use anyhow::{Context, Result};
use env_logger::{Builder, Env, Target};
use hotspot_ui::{
    api::Api,
    config::AppConfig,
    services::{
        apply::{ApplyCoordinator, RecoveryPolicy},
        journal::ApplyJournal,
        profile_store::ProfileStore,
        session_risk::SessionRiskDetector,
        status::{ProbeTimeouts, StatusProber},
    },
    system::{
        devices::SysfsDeviceEnumerator, hostapd::HostapdApplier, settings::JsonSettingsStore,
        status::SystemStatusSource,
    },
};
use log::{debug, error, info, warn};
use rustls::{
    crypto::{CryptoProvider, ring::default_provider},
    pki_types::PrivateKeyDer,
};
use rustls_pemfile::Item;
use std::{
    fs::File,
    io::{BufRead, BufReader, Write},
    path::Path,
    sync::Arc,
};
use tokio::signal::unix::{SignalKind, signal};

type UiApi = Api<HostapdApplier, JsonSettingsStore, SystemStatusSource, SysfsDeviceEnumerator>;

#[actix_web::main]
async fn main() {
    if let Err(e) = run().await {
        error!("application error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    initialize()?;

    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    let api = build_api();
    let (server_handle, server_task) =
        run_server(api.clone()).context("failed to start server")?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => debug!("ctrl-c received"),
        _ = sigterm.recv() => debug!("SIGTERM received"),
        result = server_task => {
            match result {
                Ok(Ok(())) => debug!("server stopped normally"),
                Ok(Err(e)) => error!("server stopped with error: {e}"),
                Err(e) => error!("server task panicked: {e}"),
            }
        },
    }

    info!("shutting down");
    server_handle.stop(true).await;

    // applies run detached from their request, give them the recovery window
    let probe = &AppConfig::get().probe;
    if tokio::time::timeout(
        probe.recovery_window + probe.fast_timeout,
        api.coordinator.settle(),
    )
    .await
    .is_err()
    {
        warn!("apply still in progress at shutdown");
    }
    info!("shutdown complete");

    Ok(())
}

fn initialize() -> Result<()> {
    log_panics::init();

    let mut builder = if cfg!(debug_assertions) {
        Builder::from_env(Env::default().default_filter_or("debug"))
    } else {
        Builder::from_env(Env::default().default_filter_or("info"))
    };

    builder.format(|f, record| match record.level() {
        log::Level::Error => {
            eprintln!("{}", record.args());
            Ok(())
        }
        _ => {
            writeln!(f, "{}", record.args())
        }
    });

    builder.target(Target::Stdout).init();

    info!("module version: {}", env!("CARGO_PKG_VERSION"));

    CryptoProvider::install_default(default_provider())
        .map_err(|_| anyhow::anyhow!("crypto provider already installed"))?;

    Ok(())
}

fn build_api() -> UiApi {
    let config = AppConfig::get();

    let store = Arc::new(JsonSettingsStore::new(&config.paths.settings_file));
    let source = Arc::new(SystemStatusSource::new(&config.hotspot.service));
    let applier = Arc::new(HostapdApplier::new(
        &config.hotspot.hostapd_conf,
        &config.hotspot.networkd_dir,
        &config.hotspot.service,
        &config.hotspot.served_networks,
    ));
    let risk = SessionRiskDetector::new(config.hotspot.served_networks.clone());

    let prober = StatusProber::new(
        source,
        store.clone(),
        ProbeTimeouts {
            fast: config.probe.fast_timeout,
            full: config.probe.full_timeout,
        },
    );

    let coordinator = ApplyCoordinator::new(
        applier,
        store.clone(),
        prober.clone(),
        ProfileStore::new(config.hotspot.max_profiles()),
        risk.clone(),
        RecoveryPolicy {
            interval: config.probe.recovery_interval,
            window: config.probe.recovery_window,
        },
        Arc::new(ApplyJournal::open(&config.paths.history_file)),
    );

    Api {
        coordinator,
        prober,
        store,
        devices: Arc::new(SysfsDeviceEnumerator::new(&config.hotspot.sys_class_net)),
        risk,
        trust_proxy_headers: config.ui.trust_proxy_headers,
    }
}

fn run_server(
    api: UiApi,
) -> Result<(
    ServerHandle,
    tokio::task::JoinHandle<Result<(), std::io::Error>>,
)> {
    let config = AppConfig::get();
    let address = format!("0.0.0.0:{}", config.ui.port);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(api.clone()))
            .route("/settings", web::get().to(UiApi::settings))
            .route("/settings", web::put().to(UiApi::apply_settings))
            .route("/status", web::get().to(UiApi::status))
            .route("/devices", web::get().to(UiApi::devices))
            .route("/apply/history", web::get().to(UiApi::apply_history))
            .route("/version", web::get().to(UiApi::version))
    });

    let server = match &config.certificate {
        Some(_) => {
            let tls_config = load_tls_config().context("failed to load tls config")?;
            server.bind_rustls_0_23(&address, tls_config)
        }
        None => server.bind(&address),
    }
    .context("failed to bind server")?
    .disable_signals()
    .run();

    info!("listening on {address}");

    Ok((server.handle(), tokio::spawn(server)))
}

fn load_tls_config() -> Result<rustls::ServerConfig> {
    let paths = AppConfig::get()
        .certificate
        .as_ref()
        .context("no certificate configured")?;

    let mut certs = pem_reader(&paths.cert_path)?;
    let certs = rustls_pemfile::certs(&mut certs)
        .collect::<Result<Vec<_>, _>>()
        .context("failed to parse certificate pem")?;
    let key = private_key(pem_reader(&paths.key_path)?)?;

    rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("failed to create tls config")
}

fn pem_reader(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .with_context(|| format!("failed to open {}", path.display()))
}

/// First private key in `pem`, rsa, pkcs8 or ec
fn private_key(mut pem: impl BufRead) -> Result<PrivateKeyDer<'static>> {
    match rustls_pemfile::read_one(&mut pem).context("failed to read key pem")? {
        Some(Item::Pkcs1Key(key)) => Ok(key.into()),
        Some(Item::Pkcs8Key(key)) => Ok(key.into()),
        Some(Item::Sec1Key(key)) => Ok(key.into()),
        Some(_) => anyhow::bail!("unexpected key type in pem file"),
        None => anyhow::bail!("no key found in pem file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_key_needs_a_key_item() {
        let cert = "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n";

        assert!(private_key(cert.as_bytes()).is_err());
        assert!(private_key("".as_bytes()).is_err());
    }
}
