use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = matching_engine::arguments::Arguments::parse();
    matching_engine::run(args).await
}
