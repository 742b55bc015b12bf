use crate::{
    client::{Credential, HeaderName, HttpDomainClient},
    core::NameMapper,
    index::{self, SharedDomains, SharedNamespaces, Store},
    k8s::{watcher, Api, Namespace, PolicyDomain, Watch},
    Config, ConfigMapCursor, Controller, ControllerMetrics, GoDuration, Poller,
};
use anyhow::{bail, Result};
use clap::Parser;
use futures::prelude::*;
use prometheus_client::registry::Registry;
use std::{path::PathBuf, sync::Arc};
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(
    name = "domain-syncer",
    about = "Mirrors policy service domains into PolicyDomain resources"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "domain_syncer=info,warn",
        env = "DOMAIN_SYNCER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Base URL of the policy service API, e.g. `https://zms.example.com:4443/zms/v1`.
    #[clap(long)]
    api_url: String,

    #[clap(long, value_enum, default_value = "certificate")]
    auth: Auth,

    #[clap(long, default_value = "/var/run/athenz/service.cert.pem")]
    cert: PathBuf,

    #[clap(long, default_value = "/var/run/athenz/service.key.pem")]
    key: PathBuf,

    /// A file holding a pre-minted token. It is read on every request.
    #[clap(long, default_value = "/var/run/athenz/token")]
    token_path: PathBuf,

    #[clap(long, default_value = "Athenz-Principal-Auth")]
    auth_header: HeaderName,

    #[clap(long, default_value_t = true, action = clap::ArgAction::Set)]
    disable_keep_alives: bool,

    /// How often the policy service is polled for changed domains.
    #[clap(long, default_value = "1m0s")]
    update_interval: GoDuration,

    /// How often every mirrored domain is synced, whether or not it changed.
    #[clap(long, default_value = "1h0m0s")]
    resync_interval: GoDuration,

    /// The spacing between queue admissions.
    #[clap(long, default_value = "250ms")]
    queue_delay_interval: GoDuration,

    #[clap(long, default_value = "")]
    admin_domain: String,

    /// Namespaces whose domains are subdomains of the admin domain.
    #[clap(long, value_delimiter = ',')]
    system_namespaces: Vec<String>,

    /// Namespaces that are never synced.
    #[clap(long, value_delimiter = ',')]
    exclude_namespaces: Vec<String>,

    /// Drops roles and policies generated for multi-service domains.
    #[clap(long)]
    exclude_msd_rules: bool,

    #[clap(long, default_value = "2")]
    workers: usize,

    #[clap(long, default_value = "3")]
    retry_limit: usize,

    #[clap(long, default_value = "kube-yahoo")]
    cursor_configmap_namespace: String,

    #[clap(long, default_value = "athenzcall-config")]
    cursor_configmap_name: String,

    #[clap(long, default_value = "latest_contact")]
    cursor_configmap_key: String,
}

#[derive(Copy, Clone, Debug, clap::ValueEnum)]
enum Auth {
    Certificate,
    Token,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            api_url,
            auth,
            cert,
            key,
            token_path,
            auth_header,
            disable_keep_alives,
            update_interval,
            resync_interval,
            queue_delay_interval,
            admin_domain,
            system_namespaces,
            exclude_namespaces,
            exclude_msd_rules,
            workers,
            retry_limit,
            cursor_configmap_namespace,
            cursor_configmap_name,
            cursor_configmap_key,
        } = self;

        let names = NameMapper::new(admin_domain, system_namespaces, exclude_namespaces);
        let config = Config {
            retry_limit,
            exclude_msd_rules,
            queue_interval: queue_delay_interval.into(),
        };

        // The indexes are populated by the watches below and read by the
        // controller and the poller.
        let domains = SharedDomains::default();
        let namespaces = SharedNamespaces::default();

        let mut prom = <Registry>::default();
        let reg = prom.sub_registry_with_prefix("domain_syncer");
        let metrics = ControllerMetrics::register(reg);
        index::metrics::register(reg, domains.clone(), namespaces.clone());

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let credential = match auth {
            Auth::Certificate => Credential::Certificate { cert, key },
            Auth::Token => Credential::Token {
                header: auth_header,
                path: token_path,
            },
        };
        let client = HttpDomainClient::new(&api_url, credential, disable_keep_alives).await?;

        let store = Store::with_index(Api::<PolicyDomain>::all(runtime.client()), domains);
        let controller = Controller::new(client, store, names, namespaces, config, metrics);

        // Readiness is held until both watches have delivered their initial
        // lists.
        let initialized = runtime.initialized_handle();
        let mut synced = controller.synced();

        let ns_watch = Watch::from(
            runtime
                .watch_all::<Namespace>(watcher::Config::default())
                .map(Ok::<_, watcher::Error>),
        )
        .instrument(info_span!("namespaces"));
        let mut ns_task = tokio::spawn(
            controller
                .clone()
                .watch_namespaces(ns_watch)
                .instrument(info_span!("namespaces")),
        );

        let domain_watch = Watch::from(
            runtime
                .watch_all::<PolicyDomain>(watcher::Config::default())
                .map(Ok::<_, watcher::Error>),
        )
        .instrument(info_span!("policydomains"));
        let mut domain_task = tokio::spawn(
            controller
                .clone()
                .watch_domains(domain_watch)
                .instrument(info_span!("policydomains")),
        );

        tokio::select! {
            res = synced.wait_for(|synced| *synced) => {
                if res.is_err() {
                    bail!("controller dropped before the caches synced");
                }
            }
            _ = &mut ns_task => bail!("namespace watch ended before the caches synced"),
            _ = &mut domain_task => bail!("domain watch ended before the caches synced"),
        }
        drop(initialized);

        let cursor = ConfigMapCursor::new(
            runtime.client(),
            &cursor_configmap_namespace,
            cursor_configmap_name,
            cursor_configmap_key,
        );
        let poller = Arc::new(Poller::new(
            controller.clone(),
            cursor,
            update_interval.into(),
            resync_interval.into(),
        ));
        info!(
            domains = controller.store().index().read().len(),
            namespaces = controller.namespaces().read().len(),
            cursor = %poller.cursor(),
            "Caches synced"
        );

        tokio::spawn(
            poller
                .clone()
                .run_updates(runtime.shutdown_handle())
                .instrument(info_span!("updates")),
        );
        tokio::spawn(
            poller
                .run_resync(runtime.shutdown_handle())
                .instrument(info_span!("resync")),
        );

        controller.enqueue_admin_system_domains();
        tokio::spawn(
            controller
                .run_workers(workers, runtime.shutdown_handle())
                .instrument(info_span!("workers")),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait for
        // the workers to drain before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
