use flate2::read::GzDecoder;
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Column separator: either one string or any of several characters
pub enum Delimiter {
    Str(String),
    Chars(Vec<char>),
}

impl From<&str> for Delimiter {
    fn from(s: &str) -> Self {
        Delimiter::Str(s.to_string())
    }
}

impl From<&[char]> for Delimiter {
    fn from(chars: &[char]) -> Self {
        Delimiter::Chars(chars.to_vec())
    }
}

impl<const N: usize> From<&[char; N]> for Delimiter {
    fn from(chars: &[char; N]) -> Self {
        Delimiter::Chars(chars.to_vec())
    }
}

impl Delimiter {
    fn split<'a>(&'a self, line: &'a str) -> Box<dyn Iterator<Item = &'a str> + 'a> {
        match self {
            Delimiter::Str(s) => Box::new(line.split(s.as_str())),
            Delimiter::Chars(chars) => Box::new(line.split(chars.as_slice())),
        }
    }
}

/// Guess the delimiter of a data file from its extension,
/// looking through a trailing `.gz`.
pub fn delimiter_for(file_path: &str) -> Delimiter {
    let stem = file_path.strip_suffix(".gz").unwrap_or(file_path);
    match Path::new(stem).extension().and_then(|x| x.to_str()) {
        Some("csv") => Delimiter::from(","),
        Some("tsv") => Delimiter::from("\t"),
        _ => Delimiter::from(&['\t', ',', ' ']),
    }
}

fn is_data_line(line: &str) -> bool {
    !(line.is_empty() || line.starts_with('#') || line.starts_with('%'))
}

///
/// Read numeric rows from a delimited file
///
/// * `input_file` - file name--either gzipped or not
/// * `delim` - delimiter
/// * `skip` - number of leading (header) lines to skip
///
pub fn read_lines_of_types<T>(
    input_file: &str,
    delim: impl Into<Delimiter>,
    skip: usize,
) -> anyhow::Result<Vec<Vec<T>>>
where
    T: Send + std::str::FromStr,
    <T as std::str::FromStr>::Err: std::fmt::Display,
{
    let delim = delim.into();
    let buf = open_buf_reader(input_file)?;

    let lines_raw: Vec<String> = buf
        .lines()
        .collect::<std::io::Result<Vec<_>>>()?
        .into_iter()
        .skip(skip)
        .filter(|x| is_data_line(x.trim()))
        .collect();

    // parsing takes more time than reading
    lines_raw
        .par_iter()
        .enumerate()
        .map(|(i, line)| {
            delim
                .split(line.trim())
                .filter(|w| !w.is_empty())
                .map(|w| {
                    w.trim().parse::<T>().map_err(|e| {
                        anyhow::anyhow!("{}: line {}: cannot parse `{}`: {}", input_file, i + 1, w, e)
                    })
                })
                .collect::<anyhow::Result<Vec<T>>>()
        })
        .collect()
}

///
/// Read one cluster label per line
///
/// * `input_file` - file name--either gzipped or not
///
pub fn read_labels(input_file: &str) -> anyhow::Result<Vec<usize>> {
    let rows = read_lines_of_types::<usize>(input_file, &['\t', ',', ' '], 0)?;
    rows.into_iter()
        .enumerate()
        .map(|(i, row)| match row.as_slice() {
            [label] => Ok(*label),
            _ => Err(anyhow::anyhow!(
                "{}: expected one label on line {}, found {}",
                input_file,
                i + 1,
                row.len()
            )),
        })
        .collect()
}

///
/// Write every line into the output_file
///
/// * `lines` - anything printable, one per line
/// * `output_file` - file name--either gzipped or not
///
pub fn write_types<T>(lines: &[T], output_file_path: &str) -> anyhow::Result<()>
where
    T: std::fmt::Display,
{
    let mut buf = open_buf_writer(output_file_path)?;
    for line in lines {
        if let Err(e) = writeln!(buf, "{}", line) {
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                return Ok(());
            } else {
                return Err(anyhow::anyhow!("unexpected error: {}", e));
            }
        }
    }
    buf.flush()?;
    Ok(())
}

///
/// Open a file for reading, and return a buffered reader
/// * `input_file` - file name--either gzipped or not
pub fn open_buf_reader(input_file: &str) -> anyhow::Result<Box<dyn BufRead>> {
    let file = File::open(input_file)
        .map_err(|e| anyhow::anyhow!("failed to open {}: {}", input_file, e))?;
    match Path::new(input_file).extension().and_then(|x| x.to_str()) {
        Some("gz") => Ok(Box::new(BufReader::new(GzDecoder::new(file)))),
        _ => Ok(Box::new(BufReader::new(file))),
    }
}

///
/// Open a file for writing, and return a buffered writer
/// * `output_file` - file name--either gzipped or not
pub fn open_buf_writer(output_file: &str) -> anyhow::Result<Box<dyn Write>> {
    // we can simply override with stdout
    if output_file.eq_ignore_ascii_case("stdout") {
        return Ok(Box::new(BufWriter::new(std::io::stdout())));
    }

    if output_file.eq_ignore_ascii_case("stderr") {
        return Ok(Box::new(BufWriter::new(std::io::stderr())));
    }

    mkdir(output_file)?;

    let file = File::create(output_file)?;
    match Path::new(output_file).extension().and_then(|x| x.to_str()) {
        Some("gz") => {
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            Ok(Box::new(BufWriter::new(encoder)))
        }
        _ => Ok(Box::new(BufWriter::new(file))),
    }
}

///
/// Create the parent directory of a file if needed
/// * `file` - file name
///
pub fn mkdir(file: &str) -> anyhow::Result<()> {
    if let Some(dir) = Path::new(file).parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    Ok(())
}

/// Create a fresh temporary file name ending with `suffix`. The
/// directory is kept alive until the process exits.
pub fn create_temp_dir_file(suffix: &str) -> anyhow::Result<std::path::PathBuf> {
    let temp_dir = tempfile::tempdir()?.keep();
    let temp_file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile_in(temp_dir)?
        .into_temp_path()
        .keep()?;
    Ok(temp_file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_round_trip() -> anyhow::Result<()> {
        let file = create_temp_dir_file(".txt.gz")?;
        let name = file.to_string_lossy().to_string();
        write_types(&[2usize, 0, 1, 1], &name)?;
        assert_eq!(read_labels(&name)?, vec![2, 0, 1, 1]);
        Ok(())
    }

    #[test]
    fn bad_number_is_an_error() -> anyhow::Result<()> {
        let file = create_temp_dir_file(".tsv")?;
        let name = file.to_string_lossy().to_string();
        write_types(&["1\t2", "3\tx"], &name)?;
        assert!(read_lines_of_types::<f32>(&name, "\t", 0).is_err());
        Ok(())
    }

    #[test]
    fn delimiter_from_extension() {
        assert!(matches!(delimiter_for("a.csv.gz"), Delimiter::Str(s) if s == ","));
        assert!(matches!(delimiter_for("a.tsv"), Delimiter::Str(s) if s == "\t"));
        assert!(matches!(delimiter_for("a.txt"), Delimiter::Chars(_)));
    }
}
