use docker_image_analyzer::cli::{Args, Runner};

#[tokio::main]
async fn main() {
    let args = Args::parse_args().from_env();

    if let Err(message) = args.validate() {
        eprintln!("❌ {message}");
        std::process::exit(1);
    }

    let runner = Runner::new(args);
    if let Err(err) = runner.run().await {
        print_error_chain(err.as_ref());
        std::process::exit(1);
    }
}

fn print_error_chain(err: &(dyn std::error::Error + Send + Sync)) {
    eprintln!("❌ {err}");
    let mut source = err.source();
    while let Some(cause) = source {
        eprintln!("   caused by: {cause}");
        source = cause.source();
    }
}
