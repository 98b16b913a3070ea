use clap::*;
use cpv::libs::bed::PColumn;
use cpv::libs::pipeline::{region_p, RegionPOptions};
use cpv::libs::simulate::{SimConfig, SimMode};
use std::io::Write;

// Create clap subcommand arguments
pub fn make_subcommand() -> Command {
    Command::new("region-p")
        .about("Combined, Sidak-corrected p-values for regions")
        .after_help(
            r###"
For every region, the per-site p-values lying inside it are combined with the
Stouffer-Liptak method, using correlations estimated once from the whole
p-value file as a function of distance (ACF). The combined p-value is then
Sidak-corrected for the number of region-sized windows in the covered bases.

Output columns:
    the region line, combined p, Sidak-corrected p
    [, simulated p or NA with --sim]

Notes:
* Both files are tab-separated, `#` lines are comments.
* Both files must be sorted by chromosome, then start (`sort -k1,1 -k2,2n`).
* Every region must contain at least one p-value interval.
* --step should match the spacing of the probes (or the step used with `cpv acf`).
* --sim re-estimates significance of regions below --sim-cutoff by simulating
  correlated p-values:
    tpm - truncated product of p-values <= --tau
    slk - the combined p-value itself

Examples:
1. Default run:
   cpv region-p -p pvals.bed -r regions.bed

2. p-values in the 5th column, ACF every 20 bp:
   cpv region-p -p pvals.bed -r regions.bed -c 5 -s 20

3. Check regions with corrected p < 0.05 by 10000 simulations on 4 threads:
   cpv region-p -p pvals.bed -r regions.bed --sim tpm --sim-cutoff 0.05 -N 10000 --parallel 4

"###,
        )
        .arg(
            Arg::new("pvals")
                .long("pvals")
                .short('p')
                .required(true)
                .num_args(1)
                .help("Sorted file with the per-site p-values"),
        )
        .arg(
            Arg::new("regions")
                .long("regions")
                .short('r')
                .required(true)
                .num_args(1)
                .help("Sorted file with the regions"),
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
            Arg::new("step")
                .long("step")
                .short('s')
                .num_args(1)
                .default_value("50")
                .value_parser(value_parser!(u64).range(1..))
                .help("Step size of the ACF lags"),
        )
        .arg(
            Arg::new("nsims")
                .short('N')
                .long("nsims")
                .num_args(1)
                .default_value("2000")
                .value_parser(value_parser!(usize))
                .help("Number of simulations per region, at least 10"),
        )
        .arg(
            Arg::new("tau")
                .long("tau")
                .short('t')
                .num_args(1)
                .default_value("0.05")
                .value_parser(value_parser!(f64))
                .help("Truncation cutoff of the truncated product"),
        )
        .arg(
            Arg::new("sim")
                .long("sim")
                .num_args(1)
                .default_value("none")
                .value_parser([
                    builder::PossibleValue::new("none"),
                    builder::PossibleValue::new("tpm"),
                    builder::PossibleValue::new("slk"),
                ])
                .help("Statistic re-estimated by simulation"),
        )
        .arg(
            Arg::new("sim_cutoff")
                .long("sim-cutoff")
                .num_args(1)
                .default_value("0.1")
                .value_parser(value_parser!(f64))
                .help("Simulate regions whose corrected p is below this"),
        )
        .arg(
            Arg::new("random")
                .long("random")
                .action(ArgAction::SetTrue)
                .help("Simulate from uniform p-values instead of resampling the observed ones"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .num_args(1)
                .default_value("42")
                .value_parser(value_parser!(u64))
                .help("Random seed for simulations"),
        )
        .arg(
            Arg::new("parallel")
                .long("parallel")
                .short('P')
                .num_args(1)
                .default_value("1")
                .value_parser(value_parser!(usize))
                .help("Number of threads for simulations"),
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
    let pvals = args.get_one::<String>("pvals").unwrap();
    let regions = args.get_one::<String>("regions").unwrap();
    let column = PColumn::new(*args.get_one::<i64>("column").unwrap())?;
    let step = *args.get_one::<u64>("step").unwrap();
    let nsims = *args.get_one::<usize>("nsims").unwrap();
    let tau = *args.get_one::<f64>("tau").unwrap();
    let sim_mode: SimMode = args.get_one::<String>("sim").unwrap().parse()?;
    let sim_cutoff = *args.get_one::<f64>("sim_cutoff").unwrap();
    let is_random = args.get_flag("random");
    let seed = *args.get_one::<u64>("seed").unwrap();
    let outfile = args.get_one::<String>("outfile").unwrap();

    // Set the number of threads for rayon
    let opt_parallel = *args.get_one::<usize>("parallel").unwrap();
    rayon::ThreadPoolBuilder::new()
        .num_threads(opt_parallel)
        .build_global()?;

    // draw count and tau only matter when simulating
    let sim = if sim_mode == SimMode::Disabled {
        SimConfig {
            draws: nsims,
            tau,
            seed,
        }
    } else {
        SimConfig::new(nsims, tau, seed)?
    };

    let opts = RegionPOptions {
        pvals: pvals.to_string(),
        regions: regions.to_string(),
        column,
        step,
        sim_mode,
        sim_cutoff,
        sim,
        empirical: !is_random,
    };

    //----------------------------
    // Ops
    //----------------------------
    let results = region_p(&opts)?;

    //----------------------------
    // Output
    //----------------------------
    let mut writer = cpv::writer(outfile)?;
    let with_sim = sim_mode != SimMode::Disabled;
    for result in results {
        writeln!(writer, "{}", result?.to_tsv(with_sim))?;
    }
    writer.flush()?;

    Ok(())
}
