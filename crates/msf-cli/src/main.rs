use anyhow::Result;
use clap::Parser;
use msf_cli::{main_inner, Args};

fn main() -> Result<()> {
    main_inner(Args::parse())
}
