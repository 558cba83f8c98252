//! iconforge - Text concepts to sanitized SVG icons.
//!
//! This binary starts the HTTP server and provides the `trace`, `token` and
//! `check` utilities.

use clap::Parser;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use iconforge::{
    config::{CheckConfig, Cli, Command, ServeConfig, TokenConfig, TokenOutputFormat, TraceConfig},
    gate::RequestGate,
    generate::OpenAiImageGenerator,
    limiter::{LimiterRegistry, RetryPolicy},
    pipeline::{
        decode_raster, sanitize, trace_to_svg, HttpImageFetcher, ImageFetcher,
        VectorizationPipeline,
    },
    server::{auth::SessionTokenAuth, create_router, RouterConfig},
    store::{redact_url, InMemoryCounterStore, RedisConnector, StoreConnector},
};

/// How often expired in-memory counters are swept.
const MEMORY_STORE_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Serve(config) => run_serve(config).await,
        Command::Trace(config) => run_trace(config).await,
        Command::Token(config) => run_token(config),
        Command::Check(config) => run_check(config).await,
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let policies = match config.quota.policy_table() {
        Ok(policies) => policies,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    print_banner();

    info!("Configuration:");
    for policy in policies.iter() {
        info!(
            "  Quota: {} = {} per {}s",
            policy.tier(), policy.allowance(), policy.window_secs()
        );
    }
    info!("  Images per request: {}", config.images_per_request);
    info!("  Image model: {} ({})", config.image_model, config.image_size);

    let registry = Arc::new(
        LimiterRegistry::new(policies)
            .with_key_prefix(config.key_prefix.clone())
            .with_store_timeout(config.store_timeout()),
    );

    if config.memory_store {
        warn!("  Counter store: in-memory - quotas reset on restart and are not shared");
        let store = Arc::new(InMemoryCounterStore::new());
        registry.install(store.clone());
        spawn_memory_cleanup(store);
    } else if let Some(ref url) = config.redis_url {
        info!("  Counter store: {}", redact_url(url));
        // Requests are refused with 503 until the connection is up.
        registry.spawn_initializer(RedisConnector::new(url.clone()), RetryPolicy::default());
    }

    if config.session_secret.is_some() {
        info!("  Session auth: enabled");
    } else {
        warn!("  Session auth: DISABLED - every caller is a guest");
    }
    if config.trust_forwarded_for {
        warn!("  Trusting X-Forwarded-For for caller addresses");
    }

    let generator = OpenAiImageGenerator::new(config.image_api_key.clone())
        .with_base_url(config.image_api_base.clone())
        .with_model(config.image_model.clone())
        .with_size(config.image_size.clone());
    if !generator.has_api_key() {
        warn!("  Image API key: MISSING - generation requests will fail");
    }

    let pipeline = VectorizationPipeline::new(HttpImageFetcher::new(config.fetch_timeout()))
        .with_batch_timeout(config.batch_timeout());

    let gate = RequestGate::new(Arc::clone(&registry), Arc::new(generator), pipeline)
        .with_images_per_request(config.images_per_request)
        .with_trace_options(config.trace.options());

    let router = create_router(gate, build_router_config(&config));

    let addr = config.bind_address();

    info!("");
    info!("────────────────────────────────────────────────────────────────");
    info!("  Server listening on: http://{}", addr);
    info!("");
    info!("  Try these endpoints:");
    info!("    curl http://{}/health", addr);
    info!(
        "    curl -X POST http://{}/api/generate-svg -H 'Content-Type: application/json' -d '{{\"userinput\":\"tree\"}}'",
        addr
    );
    info!("────────────────────────────────────────────────────────────────");
    info!("");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Print the startup banner.
fn print_banner() {
    let version = env!("CARGO_PKG_VERSION");
    info!("");
    info!("  ╦╔═╗╔═╗╔╗╔╔═╗╔═╗╦═╗╔═╗╔═╗");
    info!("  ║║  ║ ║║║║╠╣ ║ ║╠╦╝║ ╦║╣ ");
    info!("  ╩╚═╝╚═╝╝╚╝╚  ╚═╝╩╚═╚═╝╚═╝");
    info!("                     v{}", version);
    info!("");
}

fn spawn_memory_cleanup(store: Arc<InMemoryCounterStore>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(MEMORY_STORE_CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            store.cleanup().await;
        }
    });
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "iconforge=debug,tower_http=debug"
    } else {
        "iconforge=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build RouterConfig from the application ServeConfig.
fn build_router_config(config: &ServeConfig) -> RouterConfig {
    let mut router_config = RouterConfig::new()
        .with_tracing(!config.no_tracing)
        .with_trust_forwarded_for(config.trust_forwarded_for);

    if let Some(ref secret) = config.session_secret {
        router_config = router_config.with_session_secret(secret.clone());
    }

    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    router_config
}

// =============================================================================
// Trace Command
// =============================================================================

async fn run_trace(config: TraceConfig) -> ExitCode {
    if config.verbose {
        init_logging(true);
    }

    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let bytes = if config.is_url() {
        let fetcher = HttpImageFetcher::new(Duration::from_secs(config.fetch_timeout_secs));
        match fetcher.fetch(&config.input).await {
            Ok(bytes) => bytes.to_vec(),
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        match tokio::fs::read(&config.input).await {
            Ok(bytes) => bytes,
            Err(e) => {
                eprintln!("Error: failed to read {}: {}", config.input, e);
                return ExitCode::FAILURE;
            }
        }
    };

    let options = config.trace.options();
    let raw = config.raw;
    let traced = tokio::task::spawn_blocking(move || {
        let image = decode_raster(&bytes)?;
        let svg = trace_to_svg(&image, &options)?;
        if raw {
            Ok(svg)
        } else {
            sanitize(&svg)
        }
    })
    .await;

    let svg = match traced {
        Ok(Ok(svg)) => svg,
        Ok(Err(e)) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
        Err(e) => {
            eprintln!("Error: tracing task failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match config.output {
        Some(ref path) => {
            if let Err(e) = tokio::fs::write(path, svg.as_bytes()).await {
                eprintln!("Error: failed to write {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
            eprintln!("Wrote {} bytes to {}", svg.len(), path.display());
        }
        None => println!("{}", svg),
    }

    ExitCode::SUCCESS
}

// =============================================================================
// Token Command
// =============================================================================

fn run_token(config: TokenConfig) -> ExitCode {
    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let auth = SessionTokenAuth::new(&config.secret);
    let (token, expiry) = match auth.sign(&config.id, &config.role, Duration::from_secs(config.ttl))
    {
        Ok(signed) => signed,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match config.format {
        TokenOutputFormat::Token => {
            println!("{}", token);
        }
        TokenOutputFormat::Json => {
            let json = serde_json::json!({
                "token": token,
                "id": config.id,
                "role": config.role,
                "expiry": expiry,
                "ttl": config.ttl,
            });
            match serde_json::to_string_pretty(&json) {
                Ok(text) => println!("{}", text),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return ExitCode::FAILURE;
                }
            }
        }
    }

    ExitCode::SUCCESS
}

// =============================================================================
// Check Command
// =============================================================================

async fn run_check(config: CheckConfig) -> ExitCode {
    if config.verbose {
        init_logging(true);
    }

    println!("iconforge Configuration Check");
    println!("═════════════════════════════════");
    println!();

    let policies = match config.quota.policy_table() {
        Ok(policies) => policies,
        Err(e) => {
            println!("✗ Quota policies: {}", e);
            return ExitCode::FAILURE;
        }
    };

    println!("Quota policies:");
    println!("─────────────────");
    for policy in policies.iter() {
        println!(
            "  {:<8} {:>5} requests per {}s",
            policy.tier().as_str(),
            policy.allowance(),
            policy.window_secs()
        );
    }
    println!();

    match config.redis_url {
        Some(ref url) => {
            print!("Testing Redis connection ({})... ", redact_url(url));

            let connector = RedisConnector::new(url.clone());
            let timeout = Duration::from_millis(config.store_timeout_ms);
            match tokio::time::timeout(timeout, connector.connect()).await {
                Ok(Ok(_)) => println!("✓ success"),
                Ok(Err(e)) => {
                    println!("✗ failed");
                    println!();
                    println!("Error: {}", e);
                    println!();
                    println!("Please check:");
                    println!("  - The Redis server is running and reachable");
                    println!("  - The URL, including any password, is correct");
                    return ExitCode::FAILURE;
                }
                Err(_) => {
                    println!("✗ timed out after {}ms", config.store_timeout_ms);
                    return ExitCode::FAILURE;
                }
            }
        }
        None => {
            println!("- Redis: not configured (set --redis-url or ICONFORGE_REDIS_URL)");
        }
    }

    println!();
    println!("═════════════════════════════════");
    println!("✓ All checks passed!");

    ExitCode::SUCCESS
}
