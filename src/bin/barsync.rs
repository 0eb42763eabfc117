#[tokio::main]
async fn main() {
    barsync::utils::init_tracing();
    barsync::cli::run().await;
}
