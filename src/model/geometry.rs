use serde::{Deserialize, Serialize};

/// 空間参照系（well-known ID または WKT）
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SpatialReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wkid: Option<u32>,
    #[serde(
        rename = "latestWkid",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub latest_wkid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wkt: Option<String>,
}

impl SpatialReference {
    pub fn from_wkid(wkid: u32) -> Self {
        Self {
            wkid: Some(wkid),
            ..Default::default()
        }
    }

    /// EPSGコードとして使える ID（latestWkid を優先）
    ///
    /// Esri 独自の ID（102100 など）は対応する EPSG に読み替える。
    pub fn epsg(&self) -> Option<u32> {
        match self.latest_wkid.or(self.wkid)? {
            102100 | 102113 | 900913 => Some(3857),
            id if id >= 100000 => None,
            id => Some(id),
        }
    }
}

/// 矩形範囲 (xmin, ymin, xmax, ymax)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
    #[serde(
        rename = "spatialReference",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub spatial_reference: Option<SpatialReference>,
}

impl Envelope {
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
            spatial_reference: None,
        }
    }

    pub fn with_spatial_reference(mut self, sr: SpatialReference) -> Self {
        self.spatial_reference = Some(sr);
        self
    }

    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }

    /// 有限値で、かつ面積を持つこと
    pub fn is_valid(&self) -> bool {
        [self.xmin, self.ymin, self.xmax, self.ymax]
            .iter()
            .all(|v| v.is_finite())
            && self.xmin < self.xmax
            && self.ymin < self.ymax
    }

    /// 境界が接するだけの場合は交差とみなさない
    pub fn intersects(&self, other: &Envelope) -> bool {
        self.xmin < other.xmax
            && other.xmin < self.xmax
            && self.ymin < other.ymax
            && other.ymin < self.ymax
    }

    /// `bbox` パラメータ形式（"xmin,ymin,xmax,ymax"）
    pub fn to_param(&self) -> String {
        format!("{},{},{},{}", self.xmin, self.ymin, self.xmax, self.ymax)
    }

    pub fn parse(text: &str) -> Option<Self> {
        let parts: Vec<f64> = text
            .split(',')
            .map(|s| s.trim().parse().ok())
            .collect::<Option<Vec<_>>>()?;
        match parts.as_slice() {
            [xmin, ymin, xmax, ymax] => Some(Self::new(*xmin, *ymin, *xmax, *ymax)),
            _ => None,
        }
    }
}

/// ジオメトリ型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeometryType {
    #[serde(rename = "esriGeometryPoint")]
    Point,
    #[serde(rename = "esriGeometryMultipoint")]
    Multipoint,
    #[serde(rename = "esriGeometryPolyline")]
    Polyline,
    #[serde(rename = "esriGeometryPolygon")]
    Polygon,
    #[serde(rename = "esriGeometryEnvelope")]
    Envelope,
}

impl GeometryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeometryType::Point => "esriGeometryPoint",
            GeometryType::Multipoint => "esriGeometryMultipoint",
            GeometryType::Polyline => "esriGeometryPolyline",
            GeometryType::Polygon => "esriGeometryPolygon",
            GeometryType::Envelope => "esriGeometryEnvelope",
        }
    }
}

/// 各レコードが持つジオメトリ
///
/// 型タグを持たない JSON なので、キーの形で判別する。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Geometry {
    Envelope(Envelope),
    Point {
        x: f64,
        y: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        z: Option<f64>,
    },
    Multipoint {
        points: Vec<Vec<f64>>,
    },
    Polyline {
        paths: Vec<Vec<Vec<f64>>>,
    },
    Polygon {
        rings: Vec<Vec<Vec<f64>>>,
    },
}

impl Geometry {
    pub fn point(x: f64, y: f64) -> Self {
        Geometry::Point { x, y, z: None }
    }

    pub fn geometry_type(&self) -> GeometryType {
        match self {
            Geometry::Envelope(_) => GeometryType::Envelope,
            Geometry::Point { .. } => GeometryType::Point,
            Geometry::Multipoint { .. } => GeometryType::Multipoint,
            Geometry::Polyline { .. } => GeometryType::Polyline,
            Geometry::Polygon { .. } => GeometryType::Polygon,
        }
    }

    /// 頂点から求めた外接矩形
    pub fn bounds(&self) -> Option<Envelope> {
        let coords: Vec<&Vec<f64>> = match self {
            Geometry::Envelope(env) => return Some(env.clone()),
            Geometry::Point { x, y, .. } => return Some(Envelope::new(*x, *y, *x, *y)),
            Geometry::Multipoint { points } => points.iter().collect(),
            Geometry::Polyline { paths: parts } | Geometry::Polygon { rings: parts } => {
                parts.iter().flatten().collect()
            }
        };

        let mut iter = coords.into_iter().filter(|c| c.len() >= 2);
        let first = iter.next()?;
        let init = Envelope::new(first[0], first[1], first[0], first[1]);
        Some(iter.fold(init, |mut env, c| {
            env.xmin = env.xmin.min(c[0]);
            env.ymin = env.ymin.min(c[1]);
            env.xmax = env.xmax.max(c[0]);
            env.ymax = env.ymax.max(c[1]);
            env
        }))
    }
}
