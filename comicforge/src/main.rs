// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Comicforge binary entry point.

use clap::Parser;

use comicforge::presentation::cli::{execute, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    comicforge_bootstrap::init_tracing("comicforge=info,warn");
    let cli = Cli::parse();
    execute(cli).await
}
