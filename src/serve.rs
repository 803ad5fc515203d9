//! Development server.
//!
//! `remarkc serve` builds once, reporting every output by URL, then keeps
//! two things running:
//!
//! - a watcher thread ([`watch_loop`]) that rebuilds when a source changes;
//! - an HTTP server on a tokio runtime serving the rconf directory.
//!
//! The only state they share is a reload generation counter. The watcher
//! bumps it after a pass that wrote something; pages served as HTML carry a
//! small script that polls [`RELOAD_PATH`] and reloads when the value moves.
//!
//! ## Routes
//!
//! | Path               | Response                                      |
//! |--------------------|-----------------------------------------------|
//! | `/__livereload`    | current generation, plain text                |
//! | `/<page>.html`     | the file, with the reload script injected     |
//! | `/` or `/dir/`     | `index.html` of that directory, as above      |
//! | anything else      | static file from the rconf directory          |

use crate::builder::{BuildOptions, build_model};
use crate::config::{self, ConfigError};
use crate::output;
use crate::settings::Settings;
use crate::watch::{WatchError, watch_loop};
use chrono::Local;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use warp::Filter;
use warp::path::Tail;

/// Path polled by the reload script.
pub const RELOAD_PATH: &str = "__livereload";

const LIVERELOAD_JS: &str = include_str!("../static/livereload.js");

#[derive(Error, Debug)]
pub enum ServeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Watch(#[from] WatchError),
    #[error("invalid host address \"{0}\"")]
    Address(String),
    #[error("cannot start runtime: {0}")]
    Runtime(#[source] std::io::Error),
    #[error("cannot bind server: {0}")]
    Bind(#[from] warp::Error),
}

/// Base URL reports use. A wildcard bind address is shown as loopback.
pub fn public_base_url(addr: SocketAddr) -> String {
    let ip = if addr.ip().is_unspecified() {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    } else {
        addr.ip()
    };
    format!("http://{}", SocketAddr::new(ip, addr.port()))
}

/// Insert the reload script before `</body>`, or append it when there is none.
pub fn inject_livereload(html: &str) -> String {
    let script = format!("<script>{}</script>", LIVERELOAD_JS);
    match html.rfind("</body>") {
        Some(pos) => {
            let mut out = String::with_capacity(html.len() + script.len());
            out.push_str(&html[..pos]);
            out.push_str(&script);
            out.push_str(&html[pos..]);
            out
        }
        None => format!("{html}{script}"),
    }
}

/// The HTML file a request path maps to, if it is an HTML page below `root`.
pub fn resolve_page(root: &Path, tail: &str) -> Option<PathBuf> {
    let rel = Path::new(tail);
    if rel.components().any(|c| !matches!(c, Component::Normal(_))) {
        return None;
    }
    let path = root.join(rel);
    if tail.is_empty() || tail.ends_with('/') {
        return Some(path.join("index.html"));
    }
    let is_html = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("html") || ext.eq_ignore_ascii_case("htm"));
    is_html.then_some(path)
}

async fn page(
    root: Arc<PathBuf>,
    tail: Tail,
    livereload: bool,
) -> Result<warp::reply::Html<String>, warp::Rejection> {
    let path = resolve_page(&root, tail.as_str()).ok_or_else(warp::reject::not_found)?;
    let html = tokio::fs::read_to_string(&path)
        .await
        .map_err(|_| warp::reject::not_found())?;
    Ok(warp::reply::html(if livereload {
        inject_livereload(&html)
    } else {
        html
    }))
}

/// Options for watch-triggered rebuilds: like the startup build, including
/// `force`, but reporting only what was written.
pub fn rebuild_options(startup: &BuildOptions) -> BuildOptions {
    BuildOptions {
        report_all: false,
        ..startup.clone()
    }
}

/// All server routes over `root`.
pub fn routes(
    root: PathBuf,
    generation: Arc<AtomicU64>,
    livereload: bool,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let reload = warp::path!("__livereload")
        .and(warp::get())
        .map(move || generation.load(Ordering::SeqCst).to_string());

    let shared_root = Arc::new(root.clone());
    let pages = warp::get()
        .and(warp::path::tail())
        .and_then(move |tail: Tail| page(shared_root.clone(), tail, livereload));

    reload.or(pages).or(warp::fs::dir(root))
}

/// Build, watch and serve until the process is stopped.
pub fn serve(config_path: &Path, settings: &Settings, force: bool) -> Result<(), ServeError> {
    let ip: IpAddr = settings
        .serve
        .host
        .parse()
        .map_err(|_| ServeError::Address(settings.serve.host.clone()))?;
    let addr = SocketAddr::new(ip, settings.serve.port);
    let model = config::load(config_path)?;
    let root = model.dir().to_path_buf();

    let options = BuildOptions {
        force,
        report_all: true,
        base_url: Some(public_base_url(addr)),
        render: settings.render.clone(),
    };
    let summary = build_model(&model, &options, Local::now().fixed_offset());
    output::print_reports(&summary, &root);

    let options = rebuild_options(&options);
    let generation = Arc::new(AtomicU64::new(0));
    let watcher_generation = Arc::clone(&generation);
    let watched_config = model.path.clone();
    let watched_root = root.clone();
    let debounce = Duration::from_millis(settings.serve.debounce_ms);
    std::thread::spawn(move || {
        let result = watch_loop(&watched_config, &options, debounce, |summary| {
            output::print_reports(summary, &watched_root);
            if summary.rebuilt() > 0 {
                watcher_generation.fetch_add(1, Ordering::SeqCst);
            }
        });
        if let Err(e) = result {
            error!("watcher stopped: {e}");
        }
    });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(ServeError::Runtime)?;
    runtime.block_on(async move {
        let (bound, server) = warp::serve(routes(root, generation, settings.serve.livereload))
            .try_bind_ephemeral(addr)?;
        info!("serving on {}", public_base_url(bound));
        server.await;
        Ok::<(), ServeError>(())
    })
}
