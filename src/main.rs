use querybrain::cli;
use querybrain::core::errors::QueryError;
use querybrain::core::terminal;

#[tokio::main]
async fn main() {
    if let Err(e) = cli::run_main().await {
        if let Some(QueryError::Cancelled(_)) = e.downcast_ref::<QueryError>() {
            terminal::print_goodbye();
        } else {
            terminal::print_error(&format!("{:#}", e));
            std::process::exit(1);
        }
    }
}
