use std::io::Write;
use std::sync::Arc;

use scribe_core::cache::KnowledgeCache;
use scribe_core::clients::{OfflineGeneration, ParserRegistry};
use scribe_core::config::CoreConfig;
use scribe_core::dispatch::{
    CoreDeps, DispatchOutcome, DispatchRequest, Dispatcher, RequestPayload,
};
use scribe_core::error::ModuleError;
use scribe_core::events::EventBus;
use scribe_core::modules::SubsystemLoader;
use scribe_core::queue;
use scribe_core::workspace::WorkspaceManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = CoreConfig::from_env();

    eprintln!("📝 Scribe core v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Workspace root: {}", config.workspace_root.display());

    // ── Layout & persistence ────────────────────────────────────────────
    let workspace = Arc::new(WorkspaceManager::new(config.workspace_root.clone()));
    workspace.ensure_dirs().await?;

    let store = queue::open_or_fallback(&workspace.jobs_db_path()).await;
    eprintln!(
        "   Job store: {}",
        if store.is_durable() {
            "durable"
        } else {
            "in-memory (degraded)"
        }
    );

    let cache = Arc::new(KnowledgeCache::new());
    let bus = EventBus::new(config.event_capacity);

    // ── Optional subsystems ─────────────────────────────────────────────
    // Web search is an external integration; without one configured the
    // module is recorded unavailable and everything else still runs.
    let mut loader = SubsystemLoader::new();
    let web = loader.load("web_search", || {
        Err(ModuleError::Init(
            "no web search backend configured".to_string(),
        ))
    });
    for (name, available) in loader.report() {
        eprintln!(
            "   Module {name}: {}",
            if available { "available" } else { "unavailable" }
        );
    }

    // ── Dispatcher ──────────────────────────────────────────────────────
    let deps = CoreDeps {
        queue: Arc::clone(&store),
        generation: Arc::new(OfflineGeneration),
        parsers: Arc::new(ParserRegistry::with_builtins()),
        web,
        cache,
        workspace,
        bus: bus.clone(),
    };
    let dispatcher = Arc::new(Dispatcher::new(config, deps));
    dispatcher.activate_workspace("default").await?;

    // ── Event consumers ─────────────────────────────────────────────────
    {
        let mut status_rx = bus.subscribe_status();
        let mut result_rx = bus.subscribe_result();
        let mut error_rx = bus.subscribe_error();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok(msg) = status_rx.recv() => eprintln!("   [status] {msg}"),
                    Ok(outcome) = result_rx.recv() => {
                        eprintln!("\n── result ({}) ──\n{}\n", outcome.kind, outcome.content);
                    }
                    Ok(msg) = error_rx.recv() => eprintln!("   [error] {msg}"),
                    else => break,
                }
            }
        });
    }

    // ── Startup recovery ────────────────────────────────────────────────
    let recovered = dispatcher.recover().await;
    if recovered > 0 {
        eprintln!("   Recovered {recovered} interrupted jobs");
    }

    eprintln!("   Commands: /mode <name>, /cancel <job-id>, /quit. Anything else dispatches.\n");

    // ── REPL ────────────────────────────────────────────────────────────
    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line == "/quit" {
            break;
        }
        if let Some(mode) = line.strip_prefix("/mode ") {
            let mode = dispatcher.set_mode(mode.trim()).await;
            eprintln!("   mode: {mode}");
            continue;
        }
        if let Some(id) = line.strip_prefix("/cancel ") {
            match id.trim().parse() {
                Ok(job_id) => {
                    let found = dispatcher.cancel(job_id).await;
                    eprintln!("   cancel {job_id}: {}", if found { "requested" } else { "no such worker" });
                }
                Err(_) => eprintln!("   not a job id: {id}"),
            }
            continue;
        }

        let request = DispatchRequest {
            mode: None,
            payload: RequestPayload::text(line),
            overrides: Default::default(),
        };
        match dispatcher.dispatch(request).await {
            Ok(DispatchOutcome::Immediate(result)) => eprintln!("{result}"),
            Ok(DispatchOutcome::Queued(id)) => eprintln!("   queued: {id}"),
            Ok(DispatchOutcome::Direct(id)) => eprintln!("   running (non-durable): {id}"),
            Err(e) => eprintln!("   rejected: {e}"),
        }
    }

    dispatcher.stop_all().await;
    Ok(())
}
