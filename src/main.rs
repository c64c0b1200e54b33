fn main() -> anyhow::Result<()> {
    pothole_watch::run()
}
