extern crate clap;
use clap::*;

mod cmd_cpv;

fn main() -> anyhow::Result<()> {
    let app = Command::new("cpv")
        .version(crate_version!())
        .author(crate_authors!())
        .about("`cpv` - Combined P-values for genomic regions")
        .propagate_version(true)
        .arg_required_else_help(true)
        .color(ColorChoice::Auto)
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .action(ArgAction::Count)
                .help("Print progress to stderr; repeat for debug output"),
        )
        .subcommand(cmd_cpv::region_p::make_subcommand())
        .subcommand(cmd_cpv::acf::make_subcommand())
        .after_help(
            r###"Subcommands:

* region-p - Combine the per-site p-values inside each region,
             correcting for autocorrelation and region size
* acf      - Autocorrelation of p-values by genomic distance

Both inputs are tab-separated, sorted by chromosome then start.

"###,
        );

    let matches = app.get_matches();

    env_logger::Builder::new()
        .filter_level(match matches.get_count("verbose") {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp(None)
        .init();

    // Check which subcommand the user ran...
    match matches.subcommand() {
        Some(("region-p", sub_matches)) => cmd_cpv::region_p::execute(sub_matches),
        Some(("acf", sub_matches)) => cmd_cpv::acf::execute(sub_matches),
        _ => unreachable!(),
    }?;

    Ok(())
}
