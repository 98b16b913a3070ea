use clap::*;
use cpv::libs::acf::{estimate_acf, parse_lag_range};
use cpv::libs::bed::{PColumn, SiteReader};
use std::io::Write;

// Create clap subcommand arguments
pub fn make_subcommand() -> Command {
    Command::new("acf")
        .about("Autocorrelation of p-values by genomic distance")
        .after_help(
            r###"
Correlates -log10(p) of every pair of records on the same chromosome whose
starts are `lag_min <= distance < lag_max` apart. The last bin also takes
pairs exactly `lag_max` apart.

Output columns:
    lag_min, lag_max, correlation, number of pairs

Notes:
* The input is tab-separated and sorted by chromosome, then start.
* Lags are given as start:end:step; end is included when reached by step.
* Bins without pairs report a correlation of 0.

Examples:
1. Default lags, 1 to 500 by 50:
   cpv acf pvals.bed

2. p-values in the 4th column, lags by 20 bp:
   cpv acf pvals.bed -c 4 -d 1:301:20

"###,
        )
        .arg(
            Arg::new("infile")
                .required(true)
                .num_args(1)
                .index(1)
                .help("Sorted file with the per-site p-values. [stdin] for standard input"),
        )
        .arg(
            Arg::new("dist")
                .long("dist")
                .short('d')
                .num_args(1)
                .default_value("1:500:50")
                .help("Lags as start:end:step"),
        )
        .arg(
            Arg::new("column")
                .long("column")
                .short('c')
                .num_args(1)
                .default_value("-1")
                .allow_negative_numbers(true)
                .value_parser(value_parser!(i64))
                .help("1-based column of the p-values; negative counts from the end"),
        )
        .arg(
            Arg::new("outfile")
                .long("outfile")
                .short('o')
                .num_args(1)
                .default_value("stdout")
                .help("Output filename. [stdout] for screen"),
        )
}

// command implementation
pub fn execute(args: &ArgMatches) -> anyhow::Result<()> {
    //----------------------------
    // Args
    //----------------------------
    let infile = args.get_one::<String>("infile").unwrap();
    let lags = parse_lag_range(args.get_one::<String>("dist").unwrap())?;
    let column = PColumn::new(*args.get_one::<i64>("column").unwrap())?;
    let outfile = args.get_one::<String>("outfile").unwrap();

    //----------------------------
    // Ops
    //----------------------------
    log::info!("calculating ACF with {} lags", lags.len());
    let reader = cpv::reader(infile)?;
    let acf = estimate_acf(SiteReader::new(reader, infile, column), &lags)?;

    //----------------------------
    // Output
    //----------------------------
    let mut writer = cpv::writer(outfile)?;
    writer.write_all("#lag_min\tlag_max\tcorrelation\tN\n".as_ref())?;
    for bin in acf.bins() {
        writer.write_all(
            format!(
                "{}\t{}\t{:.4}\t{}\n",
                bin.lag_min, bin.lag_max, bin.correlation, bin.pairs
            )
            .as_ref(),
        )?;
    }
    writer.flush()?;

    Ok(())
}
