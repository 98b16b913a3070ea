use anyhow::Context;
use std::io::{BufRead, BufReader, BufWriter, Write};

/// Opens `input` for line reading. `stdin` reads standard input, a `.gz`
/// extension is decompressed on the fly.
///
/// ```
/// use std::io::BufRead;
/// let reader = cpv::reader("tests/region_p/pvals.bed").unwrap();
/// let lines = reader.lines().collect::<Vec<_>>();
/// assert!(lines.len() > 10);
///
/// assert!(cpv::reader("tests/region_p/not_there.bed").is_err());
/// ```
pub fn reader(input: &str) -> anyhow::Result<Box<dyn BufRead>> {
    let reader: Box<dyn BufRead> = if input == "stdin" {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        let path = std::path::Path::new(input);
        let file = std::fs::File::open(path)
            .with_context(|| format!("could not open {}", path.display()))?;

        if path.extension() == Some(std::ffi::OsStr::new("gz")) {
            Box::new(BufReader::new(flate2::read::MultiGzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        }
    };

    Ok(reader)
}

pub fn writer(output: &str) -> anyhow::Result<Box<dyn Write>> {
    let writer: Box<dyn Write> = if output == "stdout" {
        Box::new(BufWriter::new(std::io::stdout()))
    } else {
        let file = std::fs::File::create(output)
            .with_context(|| format!("could not create {}", output))?;
        Box::new(BufWriter::new(file))
    };

    Ok(writer)
}

/// Formats a float like C's `%.{digits}g`.
///
/// ```
/// use cpv::libs::io::format_g;
/// assert_eq!(format_g(0.0123456, 4), "0.01235");
/// assert_eq!(format_g(1.0, 4), "1");
/// assert_eq!(format_g(0.5, 4), "0.5");
/// assert_eq!(format_g(0.0, 4), "0");
/// assert_eq!(format_g(1.5e-7, 4), "1.5e-07");
/// assert_eq!(format_g(2.0e-123, 4), "2e-123");
/// assert_eq!(format_g(12346.0, 4), "1.235e+04");
/// assert_eq!(format_g(0.99996, 4), "1");
/// assert_eq!(format_g(f64::NAN, 4), "nan");
/// ```
pub fn format_g(value: f64, digits: usize) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }
    let digits = digits.max(1);

    // Let the scientific formatter do the rounding, then read back the exponent
    let sci = format!("{:.*e}", digits - 1, value);
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };

    if exp < -4 || exp >= digits as i32 {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", trim_zeros(mantissa), sign, exp.abs())
    } else {
        let decimals = (digits as i32 - 1 - exp).max(0) as usize;
        trim_zeros(&format!("{:.*}", decimals, value)).to_string()
    }
}

fn trim_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}
