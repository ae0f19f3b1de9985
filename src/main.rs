fn main() -> anyhow::Result<()> {
    pv_cli::run()
}
