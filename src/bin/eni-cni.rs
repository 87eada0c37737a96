use eni_cni::commands::run_cni;
use tracing::error;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn main() {
    // stdout carries the result document, so logs go to stderr
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);

    // Namespace operations all happen on this thread; the plugin spawns none.
    if let Err(failure) = run_cni() {
        error!("CNI plugin error: {:#}", failure.error);

        let doc = failure.to_error_doc();
        match serde_json::to_string(&doc) {
            Ok(json) => println!("{}", json),
            Err(_) => println!(r#"{{"code":{},"msg":"internal error"}}"#, doc.code),
        }
        std::process::exit(1);
    }
}
