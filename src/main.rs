use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = inbox_insights::cli::Cli::parse();

    if let Err(err) = inbox_insights::run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
