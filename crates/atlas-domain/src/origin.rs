use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Registro inmutable que describe una fuente de datos upstream.
///
/// Se crea al registrar un snapshot y nunca se muta; muchas columnas pueden
/// compartir (por igualdad estructural) el mismo `Origin`. La igualdad es
/// estructural: dos origins con los mismos campos son el mismo origin para
/// efectos de unión y deduplicación.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Origin {
    pub producer: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation_full: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_main: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_download: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_published: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_accessed: Option<NaiveDate>,
}

impl Origin {
    pub fn new(producer: impl Into<String>, title: impl Into<String>) -> Self {
        Origin { producer: producer.into(),
                 title: title.into(),
                 ..Default::default() }
    }

    pub fn with_citation(mut self, citation: impl Into<String>) -> Self {
        self.citation_full = Some(citation.into());
        self
    }

    pub fn with_urls(mut self, main: Option<String>, download: Option<String>) -> Self {
        self.url_main = main;
        self.url_download = download;
        self
    }

    pub fn with_dates(mut self, published: Option<NaiveDate>, accessed: Option<NaiveDate>) -> Self {
        self.date_published = published;
        self.date_accessed = accessed;
        self
    }
}

/// Licencia a nivel de dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct License {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl License {
    pub fn new(name: impl Into<String>) -> Self {
        License { name: name.into(), url: None }
    }
}

/// Unión de listas de origins: preserva el orden de aparición y deduplica
/// por igualdad estructural. Ninguna operación relacional descarta origins
/// implícitamente; la única vía de eliminación es `Table::drop_origins`,
/// que queda registrada en el processing log.
pub fn union_origins<'a, I>(sets: I) -> Vec<Origin>
    where I: IntoIterator<Item = &'a [Origin]>
{
    let mut out: Vec<Origin> = Vec::new();
    for set in sets {
        for origin in set {
            if !out.contains(origin) {
                out.push(origin.clone());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn o(producer: &str) -> Origin {
        Origin::new(producer, format!("{producer} dataset"))
    }

    #[test]
    fn union_preserva_orden_y_deduplica() {
        let a = vec![o("p1"), o("p2")];
        let b = vec![o("p2"), o("p3")];
        let merged = union_origins([a.as_slice(), b.as_slice()]);
        let producers: Vec<&str> = merged.iter().map(|x| x.producer.as_str()).collect();
        assert_eq!(producers, vec!["p1", "p2", "p3"]);
    }

    #[test]
    fn union_es_asociativa_y_conmutativa_en_conjunto() {
        let a = vec![o("p1")];
        let b = vec![o("p2")];
        let c = vec![o("p3")];
        let izq = union_origins([union_origins([a.as_slice(), b.as_slice()]).as_slice(), c.as_slice()]);
        let der = union_origins([a.as_slice(), union_origins([b.as_slice(), c.as_slice()]).as_slice()]);
        assert_eq!(izq, der);

        let ab: std::collections::HashSet<_> = union_origins([a.as_slice(), b.as_slice()]).into_iter().collect();
        let ba: std::collections::HashSet<_> = union_origins([b.as_slice(), a.as_slice()]).into_iter().collect();
        assert_eq!(ab, ba);
    }

    #[test]
    fn igualdad_estructural_entre_clones() {
        let x = o("p1").with_citation("cite");
        let y = x.clone();
        assert_eq!(x, y);
        assert_eq!(union_origins([std::slice::from_ref(&x), std::slice::from_ref(&y)]).len(), 1);
    }
}
