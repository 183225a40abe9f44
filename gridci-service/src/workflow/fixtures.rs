// Test Fixtures
// Workflow documents shared by unit tests

/// The firmware CI workflow: one stable cell, one experimental nightly cell
pub(crate) const EMBEDDED_CI: &str = r#"
on:
  push:
    branches: [ master ]
  pull_request:

name: Continuous integration

jobs:
  ci:
    runs-on: ubuntu-latest
    strategy:
      matrix:
        rust:
          - stable
        experimental: [false]
        include:
          - rust: nightly
            experimental: true
    continue-on-error: ${{ matrix.experimental }}

    steps:
      - uses: actions/checkout@v2
      - uses: actions-rs/toolchain@v1
        with:
          profile: minimal
          toolchain: ${{ matrix.rust }}
          target: thumbv6m-none-eabi
          override: true
      - run: ./build.sh
"#;
