//! Nanofeed terminal client.
//!
//! Connects to relays, prints the general and currency feeds to stdout, and
//! runs social and payment actions from the command line.
//!
//! # Usage
//!
//! ```bash
//! # Follow both feeds until Ctrl+C
//! nanofeed feed
//!
//! # Print three extra pages of the currency feed, then exit
//! nanofeed feed --pages 3 --currency --no-live
//!
//! # Post with a locally held key
//! NANOFEED_NSEC=nsec1... nanofeed post "hello #nanocurrency"
//!
//! # Manage the saved relay list
//! nanofeed relay add wss://relay.example.com
//! nanofeed relay list
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use nanofeed_client::feed::FeedKind;
use nanofeed_client::payment::{CurrencyWidget, ManualPay, ReqwestLnurl, TipRequest};
use nanofeed_client::relay::NostrSdkTransport;
use nanofeed_client::{
    AppContext, Config, Identity, LoadOutcome, PaymentError, ProfileUpdate, RelayListStore, TerminalRenderer,
    TipOutcome, ZapOutcome,
};
use nanofeed_core::metrics::{init_metrics, set_gauge, start_metrics_server};
use tracing_subscriber::EnvFilter;

/// Nanofeed terminal client.
#[derive(Parser, Debug)]
#[command(name = "nanofeed")]
#[command(about = "Terminal feed client with currency tipping")]
#[command(version)]
struct Args {
    /// Secret key (nsec1...) used to sign actions
    #[arg(long, env = "NANOFEED_NSEC", hide_env_values = true)]
    nsec: Option<String>,

    /// Seed relay URLs (comma-separated, overrides NANOFEED_RELAYS)
    #[arg(long, value_delimiter = ',')]
    relays: Option<Vec<String>>,

    /// Relay list database path (overrides NANOFEED_DB_PATH)
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Metrics HTTP server port (0 to disable)
    #[arg(long, default_value = "0")]
    metrics_port: u16,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the feeds, then follow new posts until Ctrl+C
    Feed {
        /// Extra pages to load after the first batch
        #[arg(long, default_value = "0")]
        pages: usize,

        /// Page through the currency feed instead of the general one
        #[arg(long)]
        currency: bool,

        /// Exit after loading instead of following live posts
        #[arg(long)]
        no_live: bool,
    },

    /// Print the reply thread under a post
    Replies { id: String },

    /// Publish a text note
    Post { content: String },

    /// Reply to a post
    Reply { parent: String, content: String },

    /// Repost a post
    Repost { id: String },

    /// React to a post (default "+")
    React {
        id: String,
        #[arg(long)]
        reaction: Option<String>,
    },

    /// Update your profile
    Profile {
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value = "")]
        about: String,
        /// Currency address to advertise
        #[arg(long)]
        nano: Option<String>,
        /// Lightning address (name@domain)
        #[arg(long)]
        lud16: Option<String>,
    },

    /// Show likes, replies, and reposts of a post
    Stats { id: String },

    /// Send currency to an author's advertised address
    Tip {
        author: String,
        /// Amount in whole units, e.g. 0.133
        amount: String,
        #[arg(long)]
        post: Option<String>,
    },

    /// Zap an author over lightning
    Zap {
        author: String,
        sats: u64,
        #[arg(long)]
        post: Option<String>,
    },

    /// Walk the social graph from an author looking for currency users
    Discover {
        seed: String,
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Manage the saved relay list
    Relay {
        #[command(subcommand)]
        action: RelayCommand,
    },
}

#[derive(Subcommand, Debug)]
enum RelayCommand {
    /// Connect to and save a relay
    Add { url: String },
    /// Disconnect and forget a relay
    Remove { url: String },
    /// List saved relays
    List,
}

// ============================================================================
// Terminal payment prompts
// ============================================================================

async fn prompt(message: String) -> std::result::Result<String, PaymentError> {
    tokio::task::spawn_blocking(move || {
        println!("{message}");
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|_| line)
    })
    .await
    .map_err(|e| PaymentError::ProviderUnavailable(e.to_string()))?
    .map_err(|e| PaymentError::ProviderUnavailable(e.to_string()))
}

/// Shows the payment URI and asks for the send block hash.
struct TerminalWidget;

#[async_trait]
impl CurrencyWidget for TerminalWidget {
    async fn open(&self, request: TipRequest) -> std::result::Result<TipOutcome, PaymentError> {
        let reply = prompt(format!(
            "{}: send {} to {}\n  {}\nPaste the block hash once sent (blank to cancel):",
            request.title,
            request.amount_display(),
            request.address,
            request.payment_uri()
        ))
        .await?;
        Ok(TipOutcome::from_reply(&reply))
    }
}

/// Prints the invoice and asks whether it was paid.
struct TerminalManualPay;

#[async_trait]
impl ManualPay for TerminalManualPay {
    async fn hand_off(&self, invoice: &str) -> std::result::Result<bool, PaymentError> {
        let reply = prompt(format!("Pay this invoice with any wallet:\n  {invoice}\nPaid? [y/N]")).await?;
        Ok(matches!(reply.trim().to_lowercase().as_str(), "y" | "yes"))
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // Install rustls crypto provider (required when both ring and aws-lc-rs are present)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap())
                .add_directive("nanofeed_client=debug".parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if args.metrics_port > 0 {
        let handle = init_metrics().context("Failed to install metrics recorder")?;
        start_metrics_server(args.metrics_port, handle)
            .await
            .with_context(|| format!("Failed to bind metrics port {}", args.metrics_port))?;
        tracing::info!("Metrics server listening on port {}", args.metrics_port);
    }

    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(relays) = args.relays {
        config.relays = relays;
    }
    if let Some(path) = args.db_path {
        config.db_path = path;
    }

    let identity = args
        .nsec
        .as_deref()
        .map(Identity::from_secret)
        .transpose()
        .context("Invalid NANOFEED_NSEC")?;

    let relay_list = RelayListStore::open(&config.db_path)
        .with_context(|| format!("Failed to open relay list at {}", config.db_path.display()))?;
    let ctx = AppContext::new(config, Arc::new(NostrSdkTransport::new()), relay_list);

    match args.command {
        Command::Relay { action } => relay_command(&ctx, action).await,
        command => {
            let live = ctx.start().await.context("Could not reach any relay")?;
            set_gauge("client_running", 1.0);
            tracing::info!("Connected to {} relays", live);
            let result = run(&ctx, identity, command).await;
            set_gauge("client_running", 0.0);
            result
        }
    }
}

async fn relay_command(ctx: &AppContext, action: RelayCommand) -> Result<()> {
    match action {
        RelayCommand::Add { url } => {
            // the saved list is rewritten from the live set
            if let Err(e) = ctx.start().await {
                tracing::warn!("No existing relay reachable: {}", e);
            }
            let url = ctx.add_relay(&url).await.context("Failed to add relay")?;
            println!("added {url}");
        }
        RelayCommand::Remove { url } => {
            if let Err(e) = ctx.start().await {
                tracing::warn!("No existing relay reachable: {}", e);
            }
            if !ctx.remove_relay(&url).await {
                bail!("{url} is not in the relay list");
            }
            println!("removed {url}");
        }
        RelayCommand::List => {
            for url in ctx.startup_relays() {
                println!("{url}");
            }
        }
    }
    Ok(())
}

async fn run(ctx: &AppContext, identity: Option<Identity>, command: Command) -> Result<()> {
    let publisher = Arc::new(ctx.publisher(identity));

    match command {
        Command::Feed {
            pages,
            currency,
            no_live,
        } => run_feed(ctx, pages, currency, no_live).await?,
        Command::Replies { id } => {
            let controller = ctx.feed_controller(Arc::new(TerminalRenderer::stdout()));
            let tree = controller.expand_replies(&id).await;
            if tree.is_empty() {
                println!("no replies");
            }
        }
        Command::Post { content } => {
            let event = publisher.post(&content).await.context("Failed to post")?;
            println!("posted {}", event.id.to_hex());
        }
        Command::Reply { parent, content } => {
            let event = publisher.reply(&parent, &content).await.context("Failed to reply")?;
            println!("replied {}", event.id.to_hex());
        }
        Command::Repost { id } => {
            let event = publisher.repost(&id).await.context("Failed to repost")?;
            println!("reposted {}", event.id.to_hex());
        }
        Command::React { id, reaction } => {
            let event = publisher
                .react(&id, reaction.as_deref())
                .await
                .context("Failed to react")?;
            println!("reacted {}", event.id.to_hex());
        }
        Command::Profile {
            name,
            about,
            nano,
            lud16,
        } => {
            let profile = publisher
                .update_profile(ProfileUpdate {
                    name,
                    about,
                    nano_address: nano,
                    lud16,
                })
                .await
                .context("Failed to update profile")?;
            println!("profile updated for {}", profile.label());
        }
        Command::Stats { id } => {
            let engagement = ctx.engagement();
            let viewer = match publisher.identity() {
                Some(identity) => Some(identity.public_key().await?),
                None => None,
            };
            let (reactions, replies, reposts) = tokio::join!(
                engagement.reactions(&id, viewer.as_deref()),
                engagement.reply_count(&id),
                engagement.repost_count(&id)
            );
            println!(
                "{} likes{}, {} replies, {} reposts",
                reactions.likes,
                if reactions.liked { " (incl. you)" } else { "" },
                replies,
                reposts
            );
        }
        Command::Tip { author, amount, post } => {
            let profile = ctx.resolver.resolve(&author).await;
            let http = Arc::new(ReqwestLnurl::new()?);
            let payments = ctx.payments(publisher, http).with_widget(Arc::new(TerminalWidget));
            match payments.tip(&profile, &amount, post.as_deref()).await.context("Tip failed")? {
                TipOutcome::Paid { block } => println!("tipped {} (block {block})", profile.label()),
                TipOutcome::Cancelled => println!("tip cancelled"),
            }
        }
        Command::Zap { author, sats, post } => {
            let profile = ctx.resolver.resolve(&author).await;
            let http = Arc::new(ReqwestLnurl::new()?);
            let payments = ctx
                .payments(publisher, http)
                .with_manual_pay(Arc::new(TerminalManualPay));
            match payments.zap(&profile, sats, post.as_deref()).await.context("Zap failed")? {
                ZapOutcome::Paid { .. } => println!("zapped {} {sats} sats", profile.label()),
                ZapOutcome::Unconfirmed { .. } => println!("zap not confirmed"),
            }
        }
        Command::Discover { seed, limit } => {
            let confirmed = ctx.discovery().discover_from(&seed, limit).await;
            println!("{} currency users found", confirmed.len());
            for author in confirmed {
                println!("{author}");
            }
        }
        Command::Relay { action } => relay_command(ctx, action).await?,
    }
    Ok(())
}

async fn run_feed(ctx: &AppContext, pages: usize, currency: bool, no_live: bool) -> Result<()> {
    let controller = Arc::new(ctx.feed_controller(Arc::new(TerminalRenderer::stdout())));
    controller.initial_load().await;

    let feed = if currency { FeedKind::Currency } else { FeedKind::General };
    for _ in 0..pages {
        tokio::time::sleep(ctx.config.throttle).await;
        match controller.load_more(feed).await {
            LoadOutcome::Loaded(0) => {
                tracing::info!("No more posts in the {} feed", feed);
                break;
            }
            LoadOutcome::Loaded(_) => {}
            other => tracing::debug!("Load skipped: {:?}", other),
        }
    }

    if no_live {
        return Ok(());
    }

    let discovery = Arc::new(ctx.discovery());
    let discovery_task = {
        let discovery = Arc::clone(&discovery);
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            discovery
                .run_periodic(move |authors: &[String]| {
                    let controller = Arc::clone(&controller);
                    let authors = authors.to_vec();
                    tokio::spawn(async move {
                        controller.reconcile_all(&authors).await;
                    });
                })
                .await;
        })
    };
    let live_task = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.run_live().await })
    };

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
    tracing::info!("Shutdown signal received, stopping gracefully...");
    discovery.stop();
    controller.stop();

    if let Err(e) = discovery_task.await {
        tracing::warn!("Discovery task panicked: {:?}", e);
    }
    match live_task.await {
        Ok(Err(e)) => tracing::warn!("Live feed ended with error: {}", e),
        Err(e) => tracing::warn!("Live feed task panicked: {:?}", e),
        Ok(Ok(())) => {}
    }

    tracing::info!(
        "Shown {} general and {} currency posts, {} currency users known",
        controller.rendered(FeedKind::General),
        controller.rendered(FeedKind::Currency),
        ctx.known.len()
    );
    Ok(())
}
