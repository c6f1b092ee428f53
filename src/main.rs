fn main() -> anyhow::Result<()> {
    headcount_lib::run()
}
