// フィーチャサービスとイメージサービスを1つずつ持つ、プロセス内の疑似ポータル
#![allow(dead_code)]

use geoservice::http::{FilePart, HttpClient, HttpResponse};
use geoservice::{Result, ServiceError};
use serde_json::{json, Map, Value};
use std::sync::Mutex;

pub const HOST: &str = "https://gis.example.com";
pub const FEATURE_URL: &str = "https://gis.example.com/server/rest/services/MA/FeatureServer";
pub const IMAGE_URL: &str = "https://gis.example.com/server/rest/services/Elevation/ImageServer";
pub const TOKEN: &str = "fake-token";

struct FakeLayer {
    id: u32,
    name: &'static str,
    geometry_type: Option<&'static str>,
    fields: Vec<(&'static str, &'static str)>,
    features: Vec<Value>,
}

impl FakeLayer {
    fn field(&self, name: &str) -> Option<&'static str> {
        self.fields
            .iter()
            .find(|(f, _)| f.eq_ignore_ascii_case(name))
            .map(|(f, _)| *f)
    }

    fn info(&self) -> Value {
        let fields: Vec<Value> = self
            .fields
            .iter()
            .map(|(name, kind)| json!({"name": name, "type": kind, "alias": name}))
            .collect();
        let mut info = json!({
            "id": self.id,
            "name": self.name,
            "type": if self.geometry_type.is_some() { "Feature Layer" } else { "Table" },
            "objectIdField": "OBJECTID",
            "fields": fields,
            "capabilities": "Create,Delete,Query,Update,Editing",
            "maxRecordCount": PAGE_SIZE,
        });
        if let Some(geometry_type) = self.geometry_type {
            info["geometryType"] = json!(geometry_type);
        }
        info
    }
}

struct State {
    layers: Vec<FakeLayer>,
    next_oid: i64,
}

/// サーバー側の1ページあたりの最大件数
pub const PAGE_SIZE: usize = 2;

pub struct FakePortal {
    state: Mutex<State>,
    tiff: Option<Vec<u8>>,
    pub requests: Mutex<Vec<String>>,
}

enum Literal {
    Text(String),
    Number(f64),
}

struct Predicate {
    field: &'static str,
    literal: Literal,
}

fn county(oid: i64, name: &str, population: i64, x: f64, y: f64) -> Value {
    json!({
        "attributes": {
            "OBJECTID": oid,
            "County_Name": name,
            "Population": population,
            "State": "MA"
        },
        "geometry": {"x": x, "y": y}
    })
}

impl FakePortal {
    pub fn new() -> Self {
        let counties = vec![
            county(1, "Barnstable County", 228996, -70.3, 41.7),
            county(2, "Berkshire County", 129026, -73.2, 42.4),
            county(3, "Bristol County", 579200, -71.1, 41.8),
            county(4, "Essex County", 809829, -70.9, 42.7),
            county(5, "Franklin County", 71029, -72.6, 42.6),
        ];

        let layers = vec![
            FakeLayer {
                id: 0,
                name: "Counties",
                geometry_type: Some("esriGeometryPoint"),
                fields: vec![
                    ("OBJECTID", "esriFieldTypeOID"),
                    ("County_Name", "esriFieldTypeString"),
                    ("Population", "esriFieldTypeInteger"),
                    ("State", "esriFieldTypeString"),
                ],
                features: counties,
            },
            FakeLayer {
                id: 1,
                name: "Towns",
                geometry_type: Some("esriGeometryPolygon"),
                fields: vec![
                    ("OBJECTID", "esriFieldTypeOID"),
                    ("Town_Name", "esriFieldTypeString"),
                ],
                features: Vec::new(),
            },
            FakeLayer {
                id: 2,
                name: "Inspections",
                geometry_type: None,
                fields: vec![
                    ("OBJECTID", "esriFieldTypeOID"),
                    ("Inspector", "esriFieldTypeString"),
                ],
                features: Vec::new(),
            },
        ];

        Self {
            state: Mutex::new(State {
                layers,
                next_oid: 6,
            }),
            tiff: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// exportImage のダウンロードで返す TIFF
    pub fn with_tiff(mut self, bytes: Vec<u8>) -> Self {
        self.tiff = Some(bytes);
        self
    }

    pub fn request_count(&self, suffix: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|url| url.ends_with(suffix))
            .count()
    }

    fn route(&self, url: &str, params: &[(String, String)]) -> HttpResponse {
        self.requests.lock().unwrap().push(url.to_string());
        let param = |key: &str| param(params, key);

        if url == format!("{}/sharing/rest/generateToken", HOST) {
            return if param("password") == Some("secret") {
                ok(json!({"token": TOKEN, "expires": 4_102_444_800_000u64, "ssl": true}))
            } else {
                ok(json!({"error": {"code": 400, "message": "Unable to generate token.",
                                    "details": ["Invalid username or password."]}}))
            };
        }

        if param("token") != Some(TOKEN) {
            return ok(json!({"error": {"code": 499, "message": "Token Required", "details": []}}));
        }

        if let Some(path) = url.strip_prefix(&format!("{}/sharing/rest/", HOST)) {
            return self.portal(path, param("publishParameters"));
        }
        if let Some(path) = url.strip_prefix(FEATURE_URL) {
            return self.feature_service(path.trim_start_matches('/'), params);
        }
        if let Some(path) = url.strip_prefix(IMAGE_URL) {
            return self.image_service(path.trim_start_matches('/'), params);
        }

        HttpResponse {
            status: 404,
            content_type: Some("text/html".into()),
            body: b"<html>Not Found</html>".to_vec(),
        }
    }

    fn portal(&self, path: &str, publish_parameters: Option<&str>) -> HttpResponse {
        match path {
            "community/self" => ok(json!({"username": "jdoe", "fullName": "J Doe"})),
            "content/users/jdoe/addItem" => ok(json!({"success": true, "id": "item-1", "folder": ""})),
            "content/users/jdoe/publish" => {
                let name = publish_parameters
                    .and_then(|p| serde_json::from_str::<Value>(p).ok())
                    .and_then(|p| p["name"].as_str().map(str::to_string))
                    .unwrap_or_default();
                ok(json!({"services": [{
                    "type": "Feature Service",
                    "serviceurl": format!("{}/hosted/{}/FeatureServer", HOST, name),
                    "serviceItemId": "item-2",
                    "jobId": "job-1"
                }]}))
            }
            _ => ok(json!({"error": {"code": 400, "message": "Invalid URL", "details": []}})),
        }
    }

    fn feature_service(&self, path: &str, params: &[(String, String)]) -> HttpResponse {
        let param = |key: &str| param(params, key);
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;

        if path.is_empty() {
            let summary = |l: &FakeLayer| json!({"id": l.id, "name": l.name});
            let layers: Vec<Value> = state
                .layers
                .iter()
                .filter(|l| l.geometry_type.is_some())
                .map(summary)
                .collect();
            let tables: Vec<Value> = state
                .layers
                .iter()
                .filter(|l| l.geometry_type.is_none())
                .map(summary)
                .collect();
            return ok(json!({
                "currentVersion": 11.1,
                "serviceDescription": "Massachusetts boundaries",
                "layers": layers,
                "tables": tables,
                "maxRecordCount": PAGE_SIZE,
                "capabilities": "Create,Delete,Query,Update,Editing"
            }));
        }

        let mut parts = path.splitn(2, '/');
        let id: Option<u32> = parts.next().and_then(|p| p.parse().ok());
        let operation = parts.next().unwrap_or("");
        let next_oid = &mut state.next_oid;
        let Some(layer) = id.and_then(|id| state.layers.iter_mut().find(|l| l.id == id)) else {
            return ok(json!({"error": {"code": 404, "message": "Layer not found", "details": []}}));
        };

        match operation {
            "" => ok(layer.info()),
            "query" => query(layer, params),
            "addFeatures" => {
                let rows: Vec<Value> = serde_json::from_str(param("features").unwrap_or("[]"))
                    .unwrap_or_default();
                let mut results = Vec::new();
                for mut row in rows {
                    let oid = *next_oid;
                    *next_oid += 1;
                    row["attributes"]["OBJECTID"] = json!(oid);
                    layer.features.push(row);
                    results.push(json!({"objectId": oid, "success": true}));
                }
                ok(json!({"addResults": results}))
            }
            "updateFeatures" => {
                let rows: Vec<Value> = serde_json::from_str(param("features").unwrap_or("[]"))
                    .unwrap_or_default();
                let mut results = Vec::new();
                for row in rows {
                    let oid = row["attributes"]["OBJECTID"].as_i64().unwrap_or(-1);
                    let target = layer
                        .features
                        .iter_mut()
                        .find(|f| f["attributes"]["OBJECTID"].as_i64() == Some(oid));
                    match (target, row["attributes"].as_object()) {
                        (Some(target), Some(attributes)) => {
                            for (k, v) in attributes {
                                target["attributes"][k.as_str()] = v.clone();
                            }
                            results.push(json!({"objectId": oid, "success": true}));
                        }
                        _ => results.push(json!({
                            "objectId": oid,
                            "success": false,
                            "error": {"code": 1019, "description": "Object is missing."}
                        })),
                    }
                }
                ok(json!({"updateResults": results}))
            }
            "deleteFeatures" => {
                let ids: Vec<i64> = param("objectIds")
                    .unwrap_or("")
                    .split(',')
                    .filter_map(|s| s.trim().parse().ok())
                    .collect();
                let results: Vec<Value> = ids
                    .iter()
                    .map(|id| {
                        let before = layer.features.len();
                        layer
                            .features
                            .retain(|f| f["attributes"]["OBJECTID"].as_i64() != Some(*id));
                        if layer.features.len() < before {
                            json!({"objectId": id, "success": true})
                        } else {
                            json!({"objectId": id, "success": false,
                                   "error": {"code": 1019, "description": "Object is missing."}})
                        }
                    })
                    .collect();
                ok(json!({"deleteResults": results}))
            }
            _ => ok(json!({"error": {"code": 400, "message": "Invalid URL", "details": []}})),
        }
    }

    fn image_service(&self, path: &str, params: &[(String, String)]) -> HttpResponse {
        let param = |key: &str| param(params, key);
        match path {
            "" => ok(json!({
                "name": "Elevation",
                "extent": {"xmin": 0, "ymin": 0, "xmax": 1000, "ymax": 1000,
                           "spatialReference": {"wkid": 102100, "latestWkid": 3857}},
                "pixelSizeX": 10,
                "pixelSizeY": 10,
                "bandCount": 1,
                "pixelType": "F32",
                "noDataValue": -9999,
                "maxImageWidth": 4000,
                "maxImageHeight": 4000,
                "spatialReference": {"wkid": 102100, "latestWkid": 3857}
            })),
            "exportImage" => {
                let bbox: Vec<f64> = param("bbox")
                    .unwrap_or("")
                    .split(',')
                    .filter_map(|s| s.parse().ok())
                    .collect();
                if bbox.len() != 4 {
                    return ok(json!({"error": {"code": 400, "message": "Invalid bbox", "details": []}}));
                }
                // imageSR が指定されればその座標系で返す
                let spatial_reference = match param("imageSR").and_then(|s| s.parse::<u32>().ok()) {
                    Some(wkid) => json!({"wkid": wkid, "latestWkid": wkid}),
                    None => json!({"wkid": 102100, "latestWkid": 3857}),
                };
                ok(json!({
                    "href": format!("{}/output/export.tif", IMAGE_URL),
                    "width": 2,
                    "height": 2,
                    "extent": {"xmin": bbox[0], "ymin": bbox[1], "xmax": bbox[2], "ymax": bbox[3],
                               "spatialReference": spatial_reference},
                    "scale": 0
                }))
            }
            "output/export.tif" => match &self.tiff {
                Some(bytes) => HttpResponse {
                    status: 200,
                    content_type: Some("image/tiff".into()),
                    body: bytes.clone(),
                },
                None => HttpResponse {
                    status: 404,
                    content_type: Some("text/plain".into()),
                    body: b"gone".to_vec(),
                },
            },
            _ => ok(json!({"error": {"code": 400, "message": "Invalid URL", "details": []}})),
        }
    }
}

fn param<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn ok(body: Value) -> HttpResponse {
    HttpResponse::json(body.to_string())
}

fn bad_query(detail: &str) -> HttpResponse {
    ok(json!({"error": {"code": 400, "message": "Unable to complete operation.",
                        "details": [detail]}}))
}

/// `1=1` と `<field> = <literal>` だけを解釈する
fn parse_where(layer: &FakeLayer, clause: &str) -> Option<Option<Predicate>> {
    let clause = clause.trim();
    if clause == "1=1" {
        return Some(None);
    }
    let (field, literal) = clause.split_once('=')?;
    let field = layer.field(field.trim())?;
    let literal = literal.trim();
    if literal.is_empty() || literal.contains('=') {
        return None;
    }
    let literal = if literal.len() >= 2 && literal.starts_with('\'') && literal.ends_with('\'') {
        Literal::Text(literal[1..literal.len() - 1].to_string())
    } else {
        Literal::Number(literal.parse().ok()?)
    };
    Some(Some(Predicate { field, literal }))
}

fn is_match(predicate: &Option<Predicate>, feature: &Value) -> bool {
    let Some(predicate) = predicate else {
        return true;
    };
    let value = &feature["attributes"][predicate.field];
    match &predicate.literal {
        Literal::Text(text) => value.as_str() == Some(text.as_str()),
        Literal::Number(n) => value.as_f64() == Some(*n),
    }
}

fn project(layer: &FakeLayer, feature: &Value, out_fields: &[&str], geometry: bool) -> Value {
    let mut attributes = Map::new();
    if let Some(all) = feature["attributes"].as_object() {
        for (k, v) in all {
            // OBJECTID は常に返す
            let keep = out_fields.contains(&"*")
                || k == "OBJECTID"
                || out_fields.iter().any(|f| f.eq_ignore_ascii_case(k));
            if keep {
                attributes.insert(k.clone(), v.clone());
            }
        }
    }
    let mut projected = json!({ "attributes": attributes });
    if geometry && layer.geometry_type.is_some() && !feature["geometry"].is_null() {
        projected["geometry"] = feature["geometry"].clone();
    }
    projected
}

fn query(layer: &FakeLayer, params: &[(String, String)]) -> HttpResponse {
    let param = |key: &str| param(params, key);
    let Some(predicate) = parse_where(layer, param("where").unwrap_or("1=1")) else {
        return bad_query("'Invalid field' parameter is invalid");
    };
    let matched: Vec<&Value> = layer
        .features
        .iter()
        .filter(|f| is_match(&predicate, f))
        .collect();

    if param("returnCountOnly") == Some("true") {
        return ok(json!({ "count": matched.len() }));
    }

    let out_fields: Vec<&str> = param("outFields")
        .unwrap_or("*")
        .split(',')
        .map(str::trim)
        .collect();
    for name in &out_fields {
        if *name != "*" && layer.field(name).is_none() {
            return bad_query("'outFields' parameter is invalid");
        }
    }

    let geometry = param("returnGeometry") != Some("false");
    let offset: usize = param("resultOffset").and_then(|s| s.parse().ok()).unwrap_or(0);
    let count = param("resultRecordCount")
        .and_then(|s| s.parse().ok())
        .map_or(PAGE_SIZE, |n: usize| n.min(PAGE_SIZE));

    let page: Vec<Value> = matched
        .iter()
        .skip(offset)
        .take(count)
        .map(|f| project(layer, f, &out_fields, geometry))
        .collect();
    let exceeded = offset + page.len() < matched.len();

    let fields: Vec<Value> = layer
        .fields
        .iter()
        .filter(|(name, _)| {
            out_fields.contains(&"*")
                || *name == "OBJECTID"
                || out_fields.iter().any(|f| f.eq_ignore_ascii_case(name))
        })
        .map(|(name, kind)| json!({"name": name, "type": kind}))
        .collect();

    let mut body = json!({
        "objectIdFieldName": "OBJECTID",
        "fields": fields,
        "features": page,
        "exceededTransferLimit": exceeded
    });
    if let Some(geometry_type) = layer.geometry_type {
        body["geometryType"] = json!(geometry_type);
        body["spatialReference"] = json!({"wkid": 4326});
    }
    ok(body)
}

impl HttpClient for FakePortal {
    fn get(&self, url: &str, params: &[(String, String)]) -> Result<HttpResponse> {
        Ok(self.route(url, params))
    }

    fn post_form(&self, url: &str, params: &[(String, String)]) -> Result<HttpResponse> {
        Ok(self.route(url, params))
    }

    fn post_multipart(
        &self,
        url: &str,
        params: &[(String, String)],
        file: FilePart,
    ) -> Result<HttpResponse> {
        if file.bytes.is_empty() {
            return Err(ServiceError::Connection("empty upload".into()));
        }
        Ok(self.route(url, params))
    }
}
