use anyhow::Context;
use clap::Parser;
use dialoguer::Input;
use keharita_common::activity::parse_records;
use keharita_common::{
    leaderboard, normalize_qid, parse_coordinate_text, recent_activity, time_ago, Catalog,
    Collection, MatchDecision, NewItemReport, NextPoint, StatusCounts, UserIdentity,
};
use keharita_rust::cli::{Cli, Commands};
use keharita_rust::config::Config;
use keharita_rust::error::KeHaritaError;
use keharita_rust::finder::CandidateFinder;
use keharita_rust::knowledge::{KnowledgeBase, WikidataClient};
use keharita_rust::session::{now_ms, DecisionOutcome, PanelState, SearchTarget, Session};
use keharita_rust::store::{fetch_collection, FirebaseStore, MemoryStore, RemoteStore, USERS};
use keharita_rust::sync::SyncListener;
use keharita_rust::loader;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = Config::load().context("設定ファイルの読み込みに失敗しました")?;

    match cli.command {
        Commands::Config { set_user, set_radius, set_store_url, set_catalog, show } => {
            let changed = set_user.is_some()
                || set_radius.is_some()
                || set_store_url.is_some()
                || set_catalog.is_some();

            if let Some(name) = set_user {
                let identity = config.set_user(&name, now_ms())?;
                println!("✔ ユーザー名を設定しました: {} ({})", identity.name, identity.user_id);
            }
            if let Some(radius) = set_radius {
                config.set_search_radius(radius)?;
                println!("✔ 検索半径を設定しました: {}m", radius);
            }
            if let Some(url) = set_store_url {
                config.store_url = Some(url);
                println!("✔ ストアURLを設定しました");
            }
            if let Some(path) = set_catalog {
                config.catalog_path = Some(path);
                println!("✔ カタログのパスを設定しました");
            }
            if changed {
                config.save()?;
            }

            if show || !changed {
                println!("設定:");
                println!("  ユーザー: {}", config.user_name.as_deref().unwrap_or("未設定"));
                println!("  検索半径: {}m", config.search_radius_m);
                println!("  ストア: {}", config.store_url.as_deref().unwrap_or("未設定（オフライン）"));
                println!("  トークン: {}", if config.store_token().is_some() { "設定済み" } else { "未設定" });
                println!("  SPARQL: {}", config.sparql_endpoint);
                println!("  言語: {}", config.language);
                println!(
                    "  カタログ: {}",
                    config
                        .catalog_path
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "未設定".into())
                );
            }
        }

        Commands::Lookup { qid } => {
            let qid = normalize_qid(&qid)?;
            let kb = WikidataClient::new(&config)?;
            match kb.entity_metadata(&qid).await? {
                Some(meta) => {
                    println!("{} {}", meta.qid, meta.label);
                    if let Some(c) = meta.coordinate {
                        println!("  座標: {}", c);
                    }
                    if let Some(area) = meta.admin_area {
                        println!("  行政区: {}", area);
                    }
                    if let Some(country) = meta.country {
                        println!("  国: {}", country);
                    }
                    if let Some(ke) = meta.catalog_ref {
                        println!("  KE ID: {}", ke);
                    }
                }
                None => println!("{} は見つかりませんでした", qid),
            }
        }

        Commands::Search { text } => {
            let kb = WikidataClient::new(&config)?;
            let hits = kb.search(&text.join(" ")).await?;
            if hits.is_empty() {
                println!("該当する項目はありません");
            }
            for hit in hits {
                println!("{:<12} {}  {}", hit.id, hit.label, hit.description);
            }
        }

        Commands::Activity { limit } => {
            let store = open_store(&config)?;
            let users = fetch_collection(store.as_ref(), USERS).await?;
            let new_items: Vec<NewItemReport> =
                parse_records(&fetch_collection(store.as_ref(), Collection::NewItems.path()).await?);
            let matches: Vec<MatchDecision> =
                parse_records(&fetch_collection(store.as_ref(), Collection::Matches.path()).await?);

            println!("🏆 ランキング");
            for (rank, stats) in leaderboard(&users, limit).iter().enumerate() {
                println!(
                    "  {:>2}. {}  計{} (照合{} / 新規{})",
                    rank + 1,
                    stats.name,
                    stats.total_count,
                    stats.match_count,
                    stats.new_item_count
                );
            }

            println!("\n🕒 最近の操作");
            let now = now_ms();
            for entry in recent_activity(&new_items, &matches, limit) {
                println!(
                    "  {}  {}  {}",
                    time_ago(now, entry.timestamp()),
                    entry.user_name(),
                    entry.describe()
                );
            }
        }

        command => {
            let catalog_path = cli
                .catalog
                .clone()
                .or_else(|| config.catalog_path.clone())
                .ok_or_else(|| {
                    KeHaritaError::Config(
                        "カタログが指定されていません。--catalog か `config --set-catalog` で指定してください".into(),
                    )
                })?;
            let mut session = open_session(&config, &catalog_path, cli.alias.as_deref())?;

            run_session_command(command, &mut session, &mut config).await?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "warn,keharita=debug,keharita_rust=debug,keharita_common=debug"
    } else {
        "warn,keharita=info,keharita_rust=info,keharita_common=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_target(false)
        .init();
}

fn open_store(config: &Config) -> anyhow::Result<Arc<dyn RemoteStore>> {
    match config.store_url.as_deref() {
        Some(url) => Ok(Arc::new(FirebaseStore::new(url, config.store_token(), config.timeout())?)),
        None => {
            warn!("store_url is not set, decisions are kept in memory only");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

fn open_session(config: &Config, catalog_path: &std::path::Path, alias: Option<&std::path::Path>) -> anyhow::Result<Session> {
    let table = loader::alias_table(alias)?;
    let load = loader::load_catalog(catalog_path, &table)
        .with_context(|| format!("カタログを読み込めません: {}", catalog_path.display()))?;
    if !load.rejected.is_empty() {
        println!("⚠ {}行を読み込めませんでした", load.rejected.len());
    }

    let kb: Arc<dyn KnowledgeBase> = Arc::new(WikidataClient::new(config)?);
    let finder = CandidateFinder::new(kb)
        .with_languages(&config.language)
        .with_category_enrichment(config.enrich_categories);

    let session = Session::new(
        Catalog::from(load),
        open_store(config)?,
        finder,
        config.search_radius_m,
    )?
    .with_identity(config.identity(now_ms()));
    Ok(session)
}

async fn run_session_command(command: Commands, session: &mut Session, config: &mut Config) -> anyhow::Result<()> {
    match command {
        Commands::Stats => {
            session.refresh().await?;
            print_counts(&session.counts());
        }

        Commands::Watch => {
            if let Err(e) = session.refresh().await {
                warn!(error = %e, "initial refresh failed");
                println!("⚠ 現在の状態を取得できませんでした: {}", e);
            }
            let mut listener = SyncListener::start(session.store()).await?;
            println!("👀 変更を監視しています（Ctrl+Cで終了）");
            print_counts(&session.counts());

            loop {
                tokio::select! {
                    event = listener.next() => {
                        let Some(event) = event else {
                            println!("購読が終了しました");
                            break;
                        };
                        match session.apply_sync_event(event) {
                            Some(report) if report.changed > 0 => print_counts(&report.counts),
                            Some(_) => {}
                            None => println!("⚠ 同期が途切れました（最後の状態を表示しています）"),
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("interrupted");
                        break;
                    }
                }
            }
        }

        Commands::Candidates { id, coord, radius } => {
            if let Some(radius) = radius {
                session.set_radius(radius)?;
            }
            let target = match (id, coord) {
                (Some(id), _) => SearchTarget::Point(id),
                (None, Some(text)) => SearchTarget::Coordinate(parse_coordinate_text(&text)?),
                (None, None) => anyhow::bail!("--id か --coord を指定してください"),
            };

            if let SearchTarget::Point(id) = target {
                if let Some(point) = session.catalog().get(id) {
                    println!("📍 KE {} {}  {}", point.id, point.name, point.location_line());
                }
            }

            let panel = session.search(target).await?;
            match &panel.state {
                PanelState::Ready(list) if list.is_empty() => {
                    println!("半径{}m以内に候補はありません", panel.radius_m);
                }
                PanelState::Ready(list) => {
                    println!("半径{}m以内の候補: {}件", panel.radius_m, list.len());
                    for c in list {
                        let category = c.category.as_deref().unwrap_or("-");
                        let ke = c.catalog_ref.as_deref().map(|k| format!(" [KE {}]", k)).unwrap_or_default();
                        println!("  {:>6.1}m  {:<12} {}  ({}){}", c.distance_m, c.qid, c.label, category, ke);
                    }
                }
                PanelState::Unavailable(message) => {
                    println!("✖ 候補を取得できませんでした: {}", message);
                }
                PanelState::Idle | PanelState::Loading => {}
            }
        }

        Commands::Next { from_id, coord } => {
            session.refresh().await?;
            let from = match (from_id, coord) {
                (Some(id), _) => session
                    .catalog()
                    .get(id)
                    .map(|p| p.coordinate)
                    .ok_or(KeHaritaError::UnknownPoint(id))?,
                (None, Some(text)) => parse_coordinate_text(&text)?,
                (None, None) => anyhow::bail!("--from-id か --coord を指定してください"),
            };
            print_next(&session.next_unmatched(&from));
        }

        Commands::Match { ke_id, qid, user } => {
            let identity = resolve_identity(user, config)?;
            session.set_identity(identity);
            session.refresh().await?;
            let outcome = session.record_match(ke_id, &qid).await?;
            println!("✔ KE {} を {} に紐付けました", ke_id, normalize_qid(&qid)?);
            print_outcome(&outcome);
        }

        Commands::NewItem { ke_id, user } => {
            let identity = resolve_identity(user, config)?;
            session.set_identity(identity);
            session.refresh().await?;
            let outcome = session.report_new_item(ke_id).await?;
            println!("✔ KE {} を新規項目として報告しました", ke_id);
            print_outcome(&outcome);
        }

        Commands::Config { .. } | Commands::Lookup { .. } | Commands::Search { .. } | Commands::Activity { .. } => {}
    }

    Ok(())
}

/// --user > 環境変数 > 設定ファイル > 対話入力
fn resolve_identity(user: Option<String>, config: &mut Config) -> anyhow::Result<UserIdentity> {
    let now = now_ms();
    if let Some(name) = user {
        return UserIdentity::from_name(&name, now).ok_or_else(|| KeHaritaError::IdentityRequired.into());
    }
    if let Some(identity) = config.identity(now) {
        return Ok(identity);
    }

    let name: String = Input::new()
        .with_prompt("ユーザー名")
        .allow_empty(true)
        .interact_text()
        .map_err(|_| KeHaritaError::IdentityRequired)?;
    if name.trim().is_empty() {
        return Err(KeHaritaError::IdentityRequired.into());
    }
    let identity = config.set_user(&name, now)?;
    config.save()?;
    Ok(identity)
}

fn print_counts(counts: &StatusCounts) {
    println!(
        "📊 全{}件  照合済み {}  新規報告 {}  未照合 {}",
        counts.total, counts.matched, counts.reported_new, counts.unmatched
    );
}

fn print_next(next: &NextPoint) {
    match next {
        NextPoint::Found { point, distance_km } => {
            println!(
                "➡ 次の地点: KE {} {}  {}  ({:.2}km)",
                point.id,
                point.name,
                point.location_line(),
                distance_km
            );
        }
        NextPoint::AllResolved => println!("🎉 未照合の地点はありません"),
    }
}

fn print_outcome(outcome: &DecisionOutcome) {
    if !outcome.counter_updated {
        println!("⚠ ユーザー集計を更新できませんでした（判定は保存済み）");
    }
    print_next(&outcome.next);
}
