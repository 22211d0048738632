use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// stderr 向けのロガーを初期化する。
///
/// `RUST_LOG` があればそれを優先し、無ければ設定のレベルを使う。
/// コアクレートの `log` レコードは tracing-log ブリッジ経由で同じ出力に流れる。
pub fn init(level: &str) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| format!("invalid log level `{level}`: {e}"))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true),
        )
        .try_init()
        .map_err(|e| format!("failed to init logging: {e}"))
}
