use hemmer_provider_aws_iot::{init_logging, serve, IotProvider};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    serve(IotProvider::aws()).await
}
