#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    smartsql::run().await
}
