use anyhow::Result;
use tracing::{error, info};
use trismedia::{Config, Relay};

#[tokio::main]
async fn main() -> Result<()> {
    trismedia_log::init();
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!("can't load configuration: {}", e);
            return Err(e);
        }
    };
    let relay = Relay::start(&config)?;
    let events = trismedia_log::subscribe();
    std::thread::spawn(move || {
        for event in events.iter() {
            info!("manager event\n{}", event.to_ami());
        }
    });

    tokio::select! {
        biased;
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            relay.stop();
        }
        _ = relay.wait() => {
            info!("both legs gone");
        }
    }
    Ok(())
}
