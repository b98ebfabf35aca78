use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "keharita")]
#[command(about = "Kültür Envanteri ↔ Wikidata 照合ツール", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 詳細ログを出力
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// KEカタログファイル（Base64またはJSON）
    #[arg(long, global = true)]
    pub catalog: Option<PathBuf>,

    /// カスタムのフィールドエイリアス（JSON）
    #[arg(long, global = true)]
    pub alias: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 照合状況を表示
    Stats,

    /// リモートの変更を購読して状況を表示し続ける
    Watch,

    /// 近傍のWikidata候補を表示
    Candidates {
        /// KE ID
        #[arg(long, conflicts_with = "coord", required_unless_present = "coord")]
        id: Option<u64>,

        /// 座標（例: "41.0082, 28.9784"）
        #[arg(long)]
        coord: Option<String>,

        /// 検索半径 (m)
        #[arg(short, long)]
        radius: Option<f64>,
    },

    /// 最寄りの未照合地点を表示
    Next {
        /// 基準にするKE ID
        #[arg(long, conflicts_with = "coord", required_unless_present = "coord")]
        from_id: Option<u64>,

        /// 基準座標
        #[arg(long)]
        coord: Option<String>,
    },

    /// KE地点を既存のWikidata項目に紐付ける
    Match {
        /// KE ID
        ke_id: u64,

        /// Wikidata QID（例: Q42）
        qid: String,

        /// ユーザー名（設定より優先）
        #[arg(short, long)]
        user: Option<String>,
    },

    /// KE地点を新規項目として報告
    NewItem {
        /// KE ID
        ke_id: u64,

        /// ユーザー名（設定より優先）
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Wikidata項目の詳細を表示
    Lookup {
        /// QID
        qid: String,
    },

    /// Wikidataをテキスト検索
    Search {
        /// 検索語
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// ランキングと最近の操作
    Activity {
        /// 表示件数
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// 設定を表示/編集
    Config {
        /// ユーザー名を設定
        #[arg(long)]
        set_user: Option<String>,

        /// 検索半径 (m) を設定
        #[arg(long)]
        set_radius: Option<f64>,

        /// FirebaseのURLを設定
        #[arg(long)]
        set_store_url: Option<String>,

        /// KEカタログのパスを設定
        #[arg(long)]
        set_catalog: Option<PathBuf>,

        /// 設定を表示
        #[arg(long)]
        show: bool,
    },
}
