fn main() -> anyhow::Result<()> {
    dryfire_lib::run()
}
