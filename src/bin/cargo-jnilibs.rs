fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1).peekable();

    // `cargo jnilibs ...` runs us as `cargo-jnilibs jnilibs ...`.
    if args.peek().map(String::as_str) == Some("jnilibs") {
        args.next();
    }

    if args.peek().map(String::as_str) == Some("env") {
        args.next();
        return cargo_jnilibs::cli::env::run(args.collect());
    }

    cargo_jnilibs::cli::run(args.collect())
}
