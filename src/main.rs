#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = picrete_exam_engine::run_worker().await {
        eprintln!("picrete-exam-engine worker fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
