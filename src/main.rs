fn main() -> anyhow::Result<()> {
    nurture_note::cli::run()
}
