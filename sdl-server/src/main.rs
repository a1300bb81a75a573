use std::sync::Arc;

use sdl_core::parser::AstJsonParser;
use sdl_core::resolver::MemoryResolver;
use sdl_core::CanvasManager;
use sdl_server::router::build_router;
use sdl_server::state::AppState;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let addr = parse_listen_addr();

    let mut resolver = MemoryResolver::new();
    if let Some(dir) = parse_source_dir() {
        let mut loaded = 0usize;
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("sdl") {
                continue;
            }
            let source = std::fs::read_to_string(&path)?;
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                resolver.insert(name, &source);
                loaded += 1;
            }
        }
        tracing::info!(dir = %dir, loaded, "seeded file resolver");
    }

    let manager = Arc::new(CanvasManager::new(
        Arc::new(resolver),
        Arc::new(AstJsonParser),
    ));
    let router = build_router(AppState::new(manager));

    tracing::info!("SDL canvas server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

/// Listen address from `--listen <addr>` or `SDL_LISTEN`, defaulting to
/// 0.0.0.0:7245.
fn parse_listen_addr() -> String {
    let args: Vec<String> = std::env::args().collect();
    if let Some(addr) = args
        .windows(2)
        .find(|w| w[0] == "--listen")
        .map(|w| w[1].clone())
    {
        return addr;
    }
    std::env::var("SDL_LISTEN").unwrap_or_else(|_| "0.0.0.0:7245".to_string())
}

/// Directory of `.sdl` sources to pre-seed the resolver with, from
/// `--src-dir <dir>` or `SDL_SRC_DIR`.
fn parse_source_dir() -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    if let Some(dir) = args
        .windows(2)
        .find(|w| w[0] == "--src-dir")
        .map(|w| w[1].clone())
    {
        return Some(dir);
    }
    std::env::var("SDL_SRC_DIR").ok()
}
