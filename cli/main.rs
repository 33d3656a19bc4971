use clap::{Parser, Subcommand};
use kinq::prelude::*;
use std::{error::Error, path::PathBuf};
use tokio::io::AsyncReadExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "kinq")]
#[command(about = "Image archive CLI", long_about = None)]
pub struct Cli {
    #[arg(long, global = true, help = "Database URL, overrides DATABASE_URL")]
    pub database_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch and archive an image by URL
    Insert {
        url: String,
    },

    /// Print an archived image as JSON
    Show {
        id: String,
    },

    /// Add tags to an image
    Tag {
        id: String,

        #[arg(required = true)]
        tags: Vec<String>,
    },

    /// Remove tags from an image
    Untag {
        id: String,

        #[arg(required = true)]
        tags: Vec<String>,
    },

    /// List recently archived images
    Recent {
        #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
        page: i64,
    },

    /// Find images carrying any of the tags
    Search {
        #[arg(short, long, help = "Tags (space separated)")]
        tags: String,

        #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
        page: i64,

        #[arg(short, long, default_value_t = RECENT_PAGE_SIZE)]
        limit: u32,
    },

    /// Soft-delete an image
    Delete {
        id: String,
    },

    /// Archive every link found on standard input
    Scan,

    /// Write a snapshot of the database
    Backup {
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kinq=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }
    let archive = config.open_archive().await?;

    match cli.command {
        Commands::Insert { url } => {
            let image = archive.insert(&url).await?;
            print_image(&image)?;
        }
        Commands::Show { id } => {
            let image = archive.one(&ImageId::from(id)).await?;
            print_image(&image)?;
        }
        Commands::Tag { id, tags } => {
            let id = ImageId::from(id);
            archive.add_tags(&id, &tags).await?;
            print_image(&archive.one(&id).await?)?;
        }
        Commands::Untag { id, tags } => {
            archive.remove_tags(&ImageId::from(id), &tags).await?;
        }
        Commands::Recent { page } => {
            let total = archive.count(None).await?;
            print_list(&archive.recent(page).await?, page, total);
        }
        Commands::Search { tags, page, limit } => {
            let tags = tags
                .split_whitespace()
                .map(String::from)
                .collect::<Vec<_>>();
            let total = archive.count(Some(tags.as_slice())).await?;
            print_list(&archive.search(limit, page, &tags).await?, page, total);
        }
        Commands::Delete { id } => {
            archive.delete(&ImageId::from(id)).await?;
        }
        Commands::Scan => {
            let mut text = String::new();
            tokio::io::stdin().read_to_string(&mut text).await?;

            let mut failed = 0;
            for (url, result) in archive.scan(&text).await {
                match result {
                    Ok(image) => println!("{}\t{}", image.id, url),
                    Err(e) => {
                        failed += 1;
                        eprintln!("{url}: {e}");
                    }
                }
            }

            if failed > 0 {
                return Err(format!("{failed} link(s) failed").into());
            }
        }
        Commands::Backup { path } => {
            archive.backup_to(&path).await?;
            println!("wrote {}", path.display());
        }
    }

    Ok(())
}

fn print_image(image: &Image) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(image)?);
    Ok(())
}

fn print_list(images: &[Image], page: i64, total: u64) {
    for image in images {
        let tags = image.tags.iter().cloned().collect::<Vec<_>>().join(" ");
        println!("{}\t{}\t{}\t{}", image.id, image.added.to_rfc3339(), image.url, tags);
    }
    eprintln!("page {page}: {} of {total} images", images.len());
}
