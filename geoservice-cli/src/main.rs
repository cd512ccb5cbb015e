use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use geoservice::{
    Client, Config, EditOutcome, Envelope, Feature, FeatureLayer, GeoTiffWriter, LocalDataset,
    Query, RasterRequest, ReqwestClient,
};
use rayon::ThreadPoolBuilder;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// ポータルのURL（未指定なら ARCGIS_HOST）
    #[arg(long, global = true)]
    host: Option<String>,

    /// 並列処理スレッド数（デフォルト: CPUコア数）
    #[arg(short, long, global = true)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// フィーチャサービスのレイヤーとテーブルを一覧表示
    Layers {
        #[arg(value_name = "SERVICE_URL")]
        url: String,
    },

    /// レイヤーのフィールドを一覧表示
    Fields {
        #[arg(value_name = "LAYER_URL")]
        url: String,
    },

    /// レイヤーを検索してJSONで出力
    Select {
        #[arg(value_name = "LAYER_URL")]
        url: String,

        /// 取得するフィールド（カンマ区切り）
        #[arg(long, value_delimiter = ',')]
        fields: Option<Vec<String>>,

        /// where 句
        #[arg(long = "where", value_name = "EXPR")]
        where_clause: Option<String>,

        /// ジオメトリも取得する
        #[arg(long)]
        geometry: bool,

        /// 最大件数
        #[arg(long)]
        limit: Option<usize>,

        /// 出力ファイル（未指定なら標準出力）
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// 条件に一致する件数を表示
    Count {
        #[arg(value_name = "LAYER_URL")]
        url: String,

        #[arg(long = "where", value_name = "EXPR")]
        where_clause: Option<String>,
    },

    /// イメージサービスから範囲を切り出してGeoTIFFに保存
    Raster {
        #[arg(value_name = "IMAGE_URL")]
        url: String,

        /// xmin,ymin,xmax,ymax（サービスの座標系）
        #[arg(long, value_parser = parse_bbox, allow_hyphen_values = true)]
        bbox: Envelope,

        /// 出力サイズ width,height
        #[arg(long, value_parser = parse_size)]
        size: Option<(u32, u32)>,

        /// 出力GeoTIFF
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },

    /// ローカルのデータをホストフィーチャレイヤーとして公開
    Publish {
        /// GeoJSON、ZIP化したShapefile、またはCSV
        #[arg(value_name = "PATH")]
        path: PathBuf,

        /// レイヤー名（デフォルト: ファイル名）
        #[arg(long)]
        name: Option<String>,
    },

    /// フィーチャを追加
    Add {
        #[arg(value_name = "LAYER_URL")]
        url: String,

        #[arg(long, value_name = "FILE")]
        features: PathBuf,
    },

    /// フィーチャを更新（各行にオブジェクトIDが必要）
    Update {
        #[arg(value_name = "LAYER_URL")]
        url: String,

        #[arg(long, value_name = "FILE")]
        features: PathBuf,
    },

    /// オブジェクトIDを指定してフィーチャを削除
    Delete {
        #[arg(value_name = "LAYER_URL")]
        url: String,

        #[arg(long, value_delimiter = ',', required = true)]
        ids: Vec<i64>,
    },
}

fn parse_bbox(text: &str) -> std::result::Result<Envelope, String> {
    Envelope::parse(text).ok_or_else(|| format!("expected xmin,ymin,xmax,ymax, got '{}'", text))
}

fn parse_size(text: &str) -> std::result::Result<(u32, u32), String> {
    let parts: Vec<&str> = text.split(',').map(str::trim).collect();
    match parts.as_slice() {
        [w, h] => match (w.parse(), h.parse()) {
            (Ok(w), Ok(h)) => Ok((w, h)),
            _ => Err(format!("invalid size '{}'", text)),
        },
        _ => Err(format!("expected width,height, got '{}'", text)),
    }
}

fn main() -> Result<()> {
    // ログの初期化
    tracing_subscriber::fmt::init();

    // CLI引数の解析
    let args = Args::parse();

    // 処理開始時間を記録
    let start_time = std::time::Instant::now();

    // スレッドプールの設定
    if let Some(threads) = args.threads {
        ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("Failed to build thread pool")?;
    }

    // 環境変数（.env）から設定を読み込み
    let mut config = Config::from_env();
    if let Some(host) = &args.host {
        config = config.with_host(host.as_str());
    }
    let client = Client::from_config(&config).context("Failed to create service client")?;

    match &args.command {
        Command::Layers { url } => list_layers(&client, url)?,
        Command::Fields { url } => list_fields(&client, url)?,
        Command::Select {
            url,
            fields,
            where_clause,
            geometry,
            limit,
            output,
        } => {
            let mut query = Query::new().geometry(*geometry);
            if let Some(fields) = fields {
                query = query.fields(fields.iter().cloned());
            }
            if let Some(where_clause) = where_clause {
                query = query.where_clause(where_clause.as_str());
            }
            if let Some(limit) = limit {
                query = query.limit(*limit);
            }
            select(&client, url, &query, output.as_deref())?;
        }
        Command::Count { url, where_clause } => {
            let layer = open_layer(&client, url)?;
            let count = client
                .count(&layer, where_clause.as_deref().unwrap_or(""))
                .with_context(|| format!("Failed to count rows of {}", layer.name()))?;
            println!("{}", count);
        }
        Command::Raster {
            url,
            bbox,
            size,
            output,
        } => {
            let mut request = RasterRequest::new(bbox.clone());
            if let Some((width, height)) = size {
                request = request.size(*width, *height);
            }
            fetch_raster(&client, url, &request, output)?;
        }
        Command::Publish { path, name } => publish(&client, path, name.as_deref())?,
        Command::Add { url, features } => {
            let layer = open_layer(&client, url)?;
            let rows = read_features(features)?;
            let outcome = client
                .add_features(&layer, &rows)
                .with_context(|| format!("Failed to add features to {}", layer.name()))?;
            report_edits("add", &outcome)?;
        }
        Command::Update { url, features } => {
            let layer = open_layer(&client, url)?;
            let rows = read_features(features)?;
            let outcome = client
                .update_features(&layer, &rows)
                .with_context(|| format!("Failed to update features of {}", layer.name()))?;
            report_edits("update", &outcome)?;
        }
        Command::Delete { url, ids } => {
            let layer = open_layer(&client, url)?;
            let outcome = client
                .delete_features(&layer, ids)
                .with_context(|| format!("Failed to delete features from {}", layer.name()))?;
            report_edits("delete", &outcome)?;
        }
    }

    // 処理時間を表示
    let elapsed = start_time.elapsed();
    info!("Total processing time: {:?}", elapsed);

    Ok(())
}

fn open_layer(client: &Client<ReqwestClient>, url: &str) -> Result<FeatureLayer> {
    client
        .open_layer(url)
        .with_context(|| format!("Failed to open layer {}", url))
}

fn list_layers(client: &Client<ReqwestClient>, url: &str) -> Result<()> {
    use rayon::prelude::*;

    let service = client
        .open(url)
        .with_context(|| format!("Failed to open service {}", url))?
        .into_feature()
        .context("Not a feature service")?;

    let ids: Vec<u32> = service.layer_summaries().map(|s| s.id).collect();
    info!("Found {} layers and tables", ids.len());

    // レイヤー情報を並列で取得
    let results: Vec<Result<FeatureLayer>> = ids
        .par_iter()
        .map(|id| open_layer(client, &service.layer_url(*id)))
        .collect();

    // エラーをチェック
    let mut layers = Vec::new();
    let mut errors = Vec::new();
    for (i, result) in results.into_iter().enumerate() {
        match result {
            Ok(layer) => layers.push(layer),
            Err(e) => errors.push(format!("layer {}: {:#}", ids[i], e)),
        }
    }

    if !errors.is_empty() {
        error!("Failed to open {} layers:", errors.len());
        for err in &errors {
            error!("  {}", err);
        }
        anyhow::bail!("{} layers failed to open", errors.len());
    }

    for layer in &layers {
        let geometry = layer
            .info
            .geometry_type
            .map(|g| g.as_str())
            .unwrap_or("table");
        println!(
            "{}\t{}\t{}\t{} fields",
            layer.id(),
            layer.name(),
            geometry,
            layer.fields().len()
        );
    }

    Ok(())
}

fn list_fields(client: &Client<ReqwestClient>, url: &str) -> Result<()> {
    let layer = open_layer(client, url)?;
    for field in client.list_fields(&layer) {
        println!(
            "{}\t{:?}\t{}",
            field.name,
            field.field_type,
            field.alias.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

fn select(
    client: &Client<ReqwestClient>,
    url: &str,
    query: &Query,
    output: Option<&Path>,
) -> Result<()> {
    let layer = open_layer(client, url)?;
    let result = client
        .select(&layer, query)
        .with_context(|| format!("Failed to query {}", layer.name()))?;
    info!("Selected {} rows from {}", result.len(), layer.name());

    match output {
        Some(path) => {
            let file = fs::File::create(path)
                .with_context(|| format!("Failed to create {:?}", path))?;
            serde_json::to_writer_pretty(file, &result)?;
            info!("Written: {:?}", path);
        }
        None => println!("{}", serde_json::to_string_pretty(&result)?),
    }
    Ok(())
}

fn fetch_raster(
    client: &Client<ReqwestClient>,
    url: &str,
    request: &RasterRequest,
    output: &Path,
) -> Result<()> {
    let image = client
        .open(url)
        .with_context(|| format!("Failed to open service {}", url))?
        .into_image()
        .context("Not an image service")?;

    let tile = client
        .fetch_raster(&image, request)
        .context("Failed to fetch raster")?;

    // 出力ディレクトリの作成
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    GeoTiffWriter::new().write(&tile, output)?;
    info!("Written GeoTIFF: {:?}", output);

    for band in 0..tile.band_count {
        if let Some(stats) = tile.band_stats(band) {
            println!(
                "band {}: min={} max={} mean={:.3} valid={}",
                band + 1,
                stats.min,
                stats.max,
                stats.mean,
                stats.valid_count
            );
        }
    }
    Ok(())
}

fn publish(client: &Client<ReqwestClient>, path: &Path, name: Option<&str>) -> Result<()> {
    let dataset = LocalDataset::open(path)?;
    let name = name.map(str::to_string).unwrap_or_else(|| dataset.stem());

    let outcome = client
        .publish(&dataset, &name)
        .with_context(|| format!("Failed to publish {:?}", path))?;
    println!("{}", outcome.service_url);
    info!("Published item {}", outcome.item_id);
    Ok(())
}

/// フィーチャの配列、または `features` を持つオブジェクトを読み込む
fn read_features(path: &Path) -> Result<Vec<Feature>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    let value: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {:?}", path))?;

    let features = match value {
        serde_json::Value::Object(mut map) if map.contains_key("features") => {
            map.remove("features").unwrap_or_default()
        }
        other => other,
    };
    serde_json::from_value(features).with_context(|| format!("Invalid features in {:?}", path))
}

fn report_edits(operation: &str, outcome: &EditOutcome) -> Result<()> {
    let failed: Vec<_> = outcome.failed().collect();
    println!(
        "{}: {} succeeded, {} failed",
        operation,
        outcome.succeeded().count(),
        failed.len()
    );

    if !failed.is_empty() {
        for result in &failed {
            let reason = result
                .error
                .as_ref()
                .map(|e| e.description.as_str())
                .unwrap_or("unknown error");
            error!("  object {:?}: {}", result.object_id, reason);
        }
        anyhow::bail!("{} edits failed", failed.len());
    }
    Ok(())
}
