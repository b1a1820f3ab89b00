use granular_mpm::config::Config;
use granular_mpm::simulation::Simulation;

use eyre::WrapErr;
use structopt::StructOpt;
use tracing::{info, Level};

#[derive(StructOpt, Debug)]
#[structopt(name = "granular_mpm")]
struct Opt {
    /// JSON configuration. Defaults are used when omitted.
    #[structopt(short, long)]
    config: Option<std::path::PathBuf>,
    #[structopt(short, long)]
    output_dir: Option<std::path::PathBuf>,
    /// Overrides the frame count of the configuration.
    #[structopt(short, long)]
    frames: Option<usize>,
    /// Repeat for more detailed logs.
    #[structopt(short, long, parse(from_occurrences))]
    verbose: u8,
}

fn main() -> eyre::Result<()> {
    let opt = Opt::from_args();

    let level = match opt.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let config = match &opt.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    let frames = opt.frames.unwrap_or(config.frames);

    if let Some(dir) = &opt.output_dir {
        std::fs::create_dir_all(dir)
            .wrap_err_with(|| format!("Failed to create output directory: {:?}", dir))?;
    }

    let mut sim = Simulation::new(config);
    for frame in 0..frames {
        info!("starting frame {}", frame);
        sim.simulate_frame();

        if let Some(dir) = &opt.output_dir {
            let path = dir.join(format!("{:03}.dat", frame));
            let mut writer = std::fs::File::create(&path)
                .wrap_err_with(|| format!("Failed to create snapshot file: {:?}", path))?;
            rmp_serde::encode::write_named(&mut writer, &sim.snapshot())
                .wrap_err_with(|| format!("Failed to write snapshot: {:?}", path))?;
        }
    }

    Ok(())
}
