use std::io;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let stdin = io::stdin();
    let mut rdr = stdin.lock();
    // Wrap stdout in an xz writer. Compressed bytes are written to stdout
    // as the compressor produces them.
    let mut wtr = xzpipe::XzWriter::new(io::stdout())?;
    // The writer must be finished even when reading fails.
    let copied = io::copy(&mut rdr, &mut wtr);
    let finished = wtr.finish();
    copied?;
    finished?;
    Ok(())
}
