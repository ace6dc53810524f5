use anyhow::Result;

fn main() -> Result<()> {
    s3stab_driver::cli::execute()
}
