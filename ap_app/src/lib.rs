use figment::{providers::Env, Figment};
use tracing_subscriber::prelude::*;

pub mod retry;
pub mod shutdown;

/// Initialise the fmt tracing subscriber, honouring `RUST_LOG`.
pub fn init_tracing() {
    let fmt_layer = tracing_subscriber::fmt::layer();

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

/// Extract a worker configuration from the environment with figment.
///
/// A `.env` file is loaded first if present, so local runs don't need the
/// variables exported.
pub fn load_config<C: serde::de::DeserializeOwned>() -> Result<C, figment::Error> {
    dotenvy::dotenv().ok();

    let figment = Figment::new().merge(Env::raw());

    figment.extract()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, serde::Deserialize)]
    struct TestConfig {
        queue_host: String,
        #[serde(default = "default_port")]
        queue_port: u16,
    }

    fn default_port() -> u16 {
        6379
    }

    #[test]
    fn config_reads_env_and_applies_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("QUEUE_HOST", "queue.internal");

            let config: TestConfig = Figment::new()
                .merge(Env::raw())
                .extract()
                .expect("config should extract");

            assert_eq!(config.queue_host, "queue.internal");
            assert_eq!(config.queue_port, 6379);
            Ok(())
        });
    }
}
