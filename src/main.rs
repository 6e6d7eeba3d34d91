// SPDX-License-Identifier: Apache-2.0

//! `postern`: inspect the enclave backends of this machine and exercise the
//! call bridge end to end.

#![deny(clippy::all)]
#![deny(missing_docs)]
#![warn(rust_2018_idioms)]

mod cli;

use clap::Parser;

fn main() -> anyhow::Result<()> {
    let app = cli::Options::parse();
    app.execute()
}
