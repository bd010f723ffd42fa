use gemini_relay::keys::KeyStore;
use gemini_relay::pool::KeyPool;
use gemini_relay::{config, logger, server};

#[tokio::main]
async fn main() {
    let settings = config::from_env();
    logger::init(&settings.log_dir, settings.log_level);

    // Log panics with their location before the process dies.
    std::panic::set_hook(Box::new(|panic_info| {
        let payload = panic_info.payload();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic payload".to_string()
        };
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "Unknown location".to_string());

        logger::error(
            "panic",
            &format!("PANIC occurred: message='{}', location='{}'", message, location),
        );
        eprintln!("FATAL PANIC: {} at {}", message, location);
    }));

    let store = match KeyStore::load(&settings.key_file) {
        Ok(store) => store,
        Err(e) => {
            logger::error("main", &format!("Relay failed to start: {}", e));
            eprintln!("Relay failed to start: {}", e);
            std::process::exit(1);
        }
    };

    let pool = KeyPool::new(store, &settings.usage_file);

    logger::info(
        "main",
        &format!(
            "Starting Gemini relay on http://{}:{}",
            settings.listen_host, settings.listen_port
        ),
    );
    logger::info(
        "main",
        &format!(
            "Placeholder token configured; forwarding to {}",
            settings.upstream_base_url
        ),
    );

    if let Err(e) = server::serve(settings, pool).await {
        logger::error("main", &format!("Server terminated: {}", e));
        eprintln!("Server terminated: {}", e);
        std::process::exit(1);
    }
}
