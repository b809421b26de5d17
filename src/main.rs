use scenelink_cli::run;

fn main() -> anyhow::Result<()> {
    // Tools started in worker and frame contexts run their own runtimes on
    // their threads; the host loop gets a multi-threaded one.
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run())
}
