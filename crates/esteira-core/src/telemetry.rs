use tracing_subscriber::EnvFilter;

/// Default filter: the reader at `info`, the AWS SDK and its HTTP stack
/// quieted to warnings. Their request-level chatter otherwise dwarfs the
/// reader's own output on every poll. `RUST_LOG` overrides the whole set.
const DEFAULT_DIRECTIVES: &str =
    "info,aws_config=warn,aws_sdk_sqs=warn,aws_smithy_runtime=warn,hyper=warn";

/// Initialize the tracing subscriber.
///
/// With `json` set the output is line-delimited JSON for log aggregation;
/// otherwise the human-readable format.
pub fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
