use anyhow::Result;
use clap::Parser;
use desktop_config_loader::config::{LoggingConfig, Settings};
use desktop_config_loader::events::WindowIdentity;
use desktop_config_loader::{ConfigStore, DesktopRuntime, DryRunRuntime, Loader, MemoryStore};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "dcl")]
#[command(about = "Загрузчик конфигурации приложений рабочего стола (режим эмуляции)")]
struct Args {
    /// Путь к файлу конфигурации
    #[arg(short, long, default_value = "loader.toml")]
    config: String,

    /// Уровень логирования (перекрывает logging.level)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load(&args.config)?;
    if let Some(level) = args.log_level {
        settings.logging.level = level;
        settings.validate()?;
    }

    // Инициализация системы логирования
    init_tracing(&settings.logging)?;

    info!("Запуск desktop-config-loader v{}", env!("CARGO_PKG_VERSION"));
    info!("Конфигурация загружена из: {}", args.config);
    warn!("Рантайм рабочего стола эмулируется, события генерируются по таймеру");

    let store = Arc::new(MemoryStore::new(settings.store.defaults.clone()));
    let runtime = Arc::new(DryRunRuntime::new(
        settings.service.uuid.clone(),
        settings.dry_run.runtime_version.clone(),
    ));

    let loader = Loader::start(
        &settings.service,
        runtime.clone() as Arc<dyn DesktopRuntime>,
        store.clone() as Arc<dyn ConfigStore>,
    );
    if !loader.initialized().await {
        anyhow::bail!("Загрузчик остановлен до завершения инициализации");
    }

    let emulation = tokio::spawn(emulate(settings.clone(), runtime, store));

    // Ожидание сигнала завершения
    tokio::select! {
        result = signal::ctrl_c() => match result {
            Ok(()) => info!("Получен сигнал завершения (Ctrl+C)"),
            Err(err) => error!("Ошибка при ожидании сигнала завершения: {}", err),
        },
        _ = emulation_finished(&emulation) => warn!("Эмуляция остановилась раньше времени"),
    }

    info!("Завершение работы...");
    loader.shutdown();
    emulation.abort();

    let shutdown_result = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = emulation.await;
    })
    .await;

    match shutdown_result {
        Ok(_) => info!("Все задачи завершили работу корректно"),
        Err(_) => warn!("Таймаут при завершении задач"),
    }

    info!("desktop-config-loader завершил работу");
    Ok(())
}

async fn emulation_finished(handle: &tokio::task::JoinHandle<()>) {
    while !handle.is_finished() {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}

/// Один цикл эмуляции: приложение с конфигурацией, его потомок, закрытие обоих
async fn emulate(settings: Settings, runtime: Arc<DryRunRuntime>, store: Arc<MemoryStore>) {
    let mut ticker = tokio::time::interval(Duration::from_millis(settings.dry_run.interval_ms));
    let settle = Duration::from_millis(50);
    let mut round: u64 = 0;

    loop {
        ticker.tick().await;
        round += 1;

        let app_uuid = format!("demo-app-{}", round);
        let child_uuid = format!("{}-child", app_uuid);
        let manifest = json!({
            "services": [{
                "name": settings.service.name,
                "config": {
                    "round": round,
                    "rules": [{"scope": {"level": "application", "uuid": child_uuid}, "config": {"child": true}}]
                }
            }]
        });

        runtime.create_application(&app_uuid, manifest);
        tokio::time::sleep(settle).await;
        if let Err(e) = runtime.create_child_application(&child_uuid, &app_uuid) {
            error!("Не удалось запустить дочернее приложение: {}", e);
            continue;
        }
        tokio::time::sleep(settle).await;
        log_window(&store, &WindowIdentity::main_window(&child_uuid));

        for uuid in [&app_uuid, &child_uuid] {
            if let Err(e) = runtime.close_application(uuid) {
                error!("Не удалось закрыть приложение '{}': {}", uuid, e);
            }
            tokio::time::sleep(settle).await;
            log_window(&store, &WindowIdentity::main_window(&child_uuid));
        }
    }
}

fn log_window(store: &MemoryStore, window: &WindowIdentity) {
    let config = store.query(&window.scope());
    info!("Конфигурация окна {}: {}", window, config);
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("{},{}", logging.level, logging.filter)))?;

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "full" {
        registry.with(tracing_subscriber::fmt::layer()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().compact()).init();
    }

    Ok(())
}
