use clap::Parser;

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "ampliseq-pipelines", version)]
pub struct Arguments {
    #[arg(short, long, default_value = "dada2")]
    pub module: String,

    #[arg(short = 'v', long = "verbose", action)]
    pub verbose: bool,

    #[arg(short = 'd', long = "dir", help = "Run directory containing <sample>.fastq.1.gz inputs. Output directories are created here. Defaults to the current working directory.")]
    pub dir: Option<String>,

    #[arg(long, default_value_t = false, help = "Paired-end mode: every <sample>.fastq.1.gz must have a <sample>.fastq.2.gz mate")]
    pub paired: bool,

    #[arg(long = "max-n", help = "Maximum number of ambiguous bases tolerated by the filter stage")]
    pub max_n: Option<String>,

    #[arg(long = "max-ee", help = "Maximum expected errors; one value, or a comma-separated pair in paired mode")]
    pub max_ee: Option<String>,

    #[arg(long = "trunc-q", help = "Truncate reads at the first base with quality below this value")]
    pub trunc_q: Option<String>,

    #[arg(long = "trunc-len", help = "Truncation length; one value, or a comma-separated pair in paired mode")]
    pub trunc_len: Option<String>,

    #[arg(long, default_value_t = 1_000_000, help = "Reads used for error-model learning in sample inference")]
    pub nreads: usize,

    #[arg(long = "taxonomy-file", help = "Reference training set for taxonomy assignment")]
    pub taxonomy_file: Option<String>,

    #[arg(long = "species-file", help = "Species-level reference for taxonomy assignment")]
    pub species_file: Option<String>,

    #[arg(long = "taxonomy-memory", default_value = "4G", help = "Memory hint exported to the taxonomy stage")]
    pub taxonomy_memory: String,

    #[arg(long = "scripts-dir", default_value = "scripts")]
    pub scripts_dir: String,

    #[arg(short = 'j', long = "jobs", default_value_t = 4, help = "Maximum number of tasks run concurrently")]
    pub jobs: usize,
}
