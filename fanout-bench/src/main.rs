use anyhow::Result;

fn main() -> Result<()> {
    fanout_bench::cli::execute()
}
