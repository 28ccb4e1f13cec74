//! The native dependency catalog and its build-order graph.
//!
//! Every C/C++ library the final binary links statically is declared here,
//! once, with its pinned version and its build-order dependencies. The rest
//! of the pipeline treats the catalog as read-only input.

use std::collections::{HashMap, HashSet};

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;

/// One native library to fetch, cross-compile and install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencySpec {
  pub name: &'static str,
  pub version: &'static str,
  /// Upstream release archive.
  pub url: String,
  /// Pinned SHA256 of the archive, verified on every fetch when present.
  /// Unpinned entries are still verified against the digest the fetcher
  /// records on first download.
  pub sha256: Option<&'static str>,
  /// Catalog names this library needs installed before its own build.
  pub depends_on: &'static [&'static str],
}

/// The full set of native libraries, in declaration order.
///
/// Build order is derived from `depends_on` via [`DepGraph`], never from the
/// order of this list.
pub fn catalog() -> Vec<DependencySpec> {
  vec![
    DependencySpec {
      name: "zlib",
      version: "1.3.1",
      url: "https://zlib.net/zlib-1.3.1.tar.gz".to_string(),
      sha256: Some("9a93b2b7dfdac77ceba5a558a580e74667dd6fede4585b91eefb60f03b72df23"),
      depends_on: &[],
    },
    DependencySpec {
      name: "openssl",
      version: "3.3.1",
      url: "https://www.openssl.org/source/openssl-3.3.1.tar.gz".to_string(),
      sha256: Some("777cd596284c883375a2a7a11bf5d2786fc5413255efab20c50d6ffe6d020b7e"),
      depends_on: &["zlib"],
    },
    DependencySpec {
      name: "libvpx",
      version: "1.14.1",
      url: "https://github.com/webmproject/libvpx/archive/refs/tags/v1.14.1.tar.gz".to_string(),
      // TODO: pin the libvpx, ffmpeg, rlottie and opencv digests once the
      // mirror we fetch from is settled; until then the fetcher's recorded
      // first-fetch digest guards these four.
      sha256: None,
      depends_on: &[],
    },
    DependencySpec {
      name: "ffmpeg",
      version: "7.0.2",
      url: "https://ffmpeg.org/releases/ffmpeg-7.0.2.tar.gz".to_string(),
      sha256: None,
      depends_on: &["zlib", "openssl", "libvpx"],
    },
    DependencySpec {
      name: "rlottie",
      version: "0.2",
      url: "https://github.com/Samsung/rlottie/archive/refs/tags/v0.2.tar.gz".to_string(),
      sha256: None,
      depends_on: &[],
    },
    DependencySpec {
      name: "opencv",
      version: "4.10.0",
      url: "https://github.com/opencv/opencv/archive/refs/tags/4.10.0.tar.gz".to_string(),
      sha256: None,
      depends_on: &["zlib"],
    },
  ]
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DepError {
  #[error("dependency {wanted_by} requires unknown dependency {name}")]
  UnknownDependency { name: String, wanted_by: String },

  #[error("dependency graph contains a cycle")]
  CycleDetected,
}

/// Build-order DAG over the catalog.
///
/// Edges run from a dependency to its dependents, so a topological order is
/// a valid install order and Kahn levels form parallel build waves.
#[derive(Debug)]
pub struct DepGraph {
  graph: DiGraph<&'static str, ()>,
  nodes: HashMap<&'static str, NodeIndex>,
}

impl DepGraph {
  pub fn new(specs: &[DependencySpec]) -> Result<Self, DepError> {
    let mut graph = DiGraph::new();
    let mut nodes = HashMap::new();

    for spec in specs {
      let idx = graph.add_node(spec.name);
      nodes.insert(spec.name, idx);
    }

    for spec in specs {
      let dependent_idx = nodes[spec.name];
      for dep in spec.depends_on {
        let Some(&dep_idx) = nodes.get(dep) else {
          return Err(DepError::UnknownDependency {
            name: dep.to_string(),
            wanted_by: spec.name.to_string(),
          });
        };
        graph.add_edge(dep_idx, dependent_idx, ());
      }
    }

    let dag = Self { graph, nodes };
    dag.verify_acyclic()?;

    Ok(dag)
  }

  fn verify_acyclic(&self) -> Result<(), DepError> {
    toposort(&self.graph, None).map_err(|_| DepError::CycleDetected)?;
    Ok(())
  }

  /// Dependency names in an order where dependencies come before dependents.
  pub fn topological(&self) -> Result<Vec<&'static str>, DepError> {
    let sorted = toposort(&self.graph, None).map_err(|_| DepError::CycleDetected)?;
    Ok(sorted.into_iter().map(|idx| self.graph[idx]).collect())
  }

  /// Dependencies grouped into parallel build waves.
  ///
  /// Each wave contains libraries whose dependencies all sit in earlier
  /// waves, so everything within a wave can build concurrently.
  pub fn waves(&self) -> Result<Vec<Vec<&'static str>>, DepError> {
    let mut in_degree: HashMap<NodeIndex, usize> = HashMap::new();
    let mut node_level: HashMap<NodeIndex, usize> = HashMap::new();

    for idx in self.graph.node_indices() {
      in_degree.insert(idx, self.graph.neighbors_directed(idx, Direction::Incoming).count());
    }

    let mut current_level = 0;
    let mut remaining: HashSet<NodeIndex> = self.graph.node_indices().collect();

    while !remaining.is_empty() {
      let ready: Vec<NodeIndex> = remaining.iter().filter(|&&idx| in_degree[&idx] == 0).copied().collect();

      if ready.is_empty() {
        return Err(DepError::CycleDetected);
      }

      for &idx in &ready {
        node_level.insert(idx, current_level);
        remaining.remove(&idx);

        for neighbor in self.graph.neighbors_directed(idx, Direction::Outgoing) {
          if let Some(deg) = in_degree.get_mut(&neighbor) {
            *deg = deg.saturating_sub(1);
          }
        }
      }

      current_level += 1;
    }

    let max_level = node_level.values().copied().max().unwrap_or(0);
    let mut waves: Vec<Vec<&'static str>> = vec![Vec::new(); max_level + 1];

    for (&name, &idx) in &self.nodes {
      if let Some(&level) = node_level.get(&idx) {
        waves[level].push(name);
      }
    }

    for wave in &mut waves {
      wave.sort_unstable();
    }
    waves.retain(|w| !w.is_empty());

    Ok(waves)
  }

  /// Direct dependencies of `name`, sorted for stable output.
  pub fn dependencies_of(&self, name: &str) -> Vec<&'static str> {
    let Some(&idx) = self.nodes.get(name) else {
      return Vec::new();
    };

    let mut deps: Vec<&'static str> = self
      .graph
      .neighbors_directed(idx, Direction::Incoming)
      .map(|dep_idx| self.graph[dep_idx])
      .collect();
    deps.sort_unstable();
    deps
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn catalog_lists_six_unique_libraries() {
    let specs = catalog();
    assert_eq!(specs.len(), 6);

    let names: HashSet<&str> = specs.iter().map(|s| s.name).collect();
    assert_eq!(names.len(), 6);
    for name in ["zlib", "openssl", "libvpx", "ffmpeg", "rlottie", "opencv"] {
      assert!(names.contains(name), "catalog is missing {name}");
    }
  }

  #[test]
  fn catalog_urls_embed_the_pinned_version() {
    for spec in catalog() {
      assert!(
        spec.url.contains(spec.version),
        "{} url does not mention version {}",
        spec.name,
        spec.version
      );
      assert!(spec.url.ends_with(".tar.gz"), "{} is not a tar.gz release", spec.name);
    }
  }

  #[test]
  fn pinned_digests_are_lowercase_hex() {
    for spec in catalog() {
      if let Some(digest) = spec.sha256 {
        assert_eq!(digest.len(), 64, "{} digest has wrong length", spec.name);
        assert!(
          digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()),
          "{} digest is not lowercase hex",
          spec.name
        );
      }
    }
  }

  #[test]
  fn catalog_graph_waves() {
    let specs = catalog();
    let dag = DepGraph::new(&specs).unwrap();
    let waves = dag.waves().unwrap();

    assert_eq!(waves.len(), 3);
    assert_eq!(waves[0], vec!["libvpx", "rlottie", "zlib"]);
    assert_eq!(waves[1], vec!["opencv", "openssl"]);
    assert_eq!(waves[2], vec!["ffmpeg"]);
  }

  #[test]
  fn topological_order_respects_edges() {
    let specs = catalog();
    let dag = DepGraph::new(&specs).unwrap();
    let topo = dag.topological().unwrap();

    let pos = |name: &str| topo.iter().position(|n| *n == name).unwrap();
    assert!(pos("zlib") < pos("openssl"));
    assert!(pos("zlib") < pos("opencv"));
    assert!(pos("openssl") < pos("ffmpeg"));
    assert!(pos("libvpx") < pos("ffmpeg"));
  }

  #[test]
  fn ffmpeg_needs_three_libraries() {
    let specs = catalog();
    let dag = DepGraph::new(&specs).unwrap();

    assert_eq!(dag.dependencies_of("ffmpeg"), vec!["libvpx", "openssl", "zlib"]);
    assert_eq!(dag.dependencies_of("zlib"), Vec::<&str>::new());
  }

  #[test]
  fn unknown_dependency_is_rejected() {
    let specs = vec![DependencySpec {
      name: "orphan",
      version: "1.0",
      url: "https://example.com/orphan-1.0.tar.gz".to_string(),
      sha256: None,
      depends_on: &["missing"],
    }];

    let err = DepGraph::new(&specs).unwrap_err();
    assert_eq!(
      err,
      DepError::UnknownDependency {
        name: "missing".to_string(),
        wanted_by: "orphan".to_string(),
      }
    );
  }

  #[test]
  fn cycle_is_rejected() {
    let specs = vec![
      DependencySpec {
        name: "a",
        version: "1.0",
        url: "https://example.com/a.tar.gz".to_string(),
        sha256: None,
        depends_on: &["b"],
      },
      DependencySpec {
        name: "b",
        version: "1.0",
        url: "https://example.com/b.tar.gz".to_string(),
        sha256: None,
        depends_on: &["a"],
      },
    ];

    let err = DepGraph::new(&specs).unwrap_err();
    assert_eq!(err, DepError::CycleDetected);
  }

  #[test]
  fn empty_catalog_yields_no_waves() {
    let dag = DepGraph::new(&[]).unwrap();
    assert!(dag.is_empty());
    assert!(dag.waves().unwrap().is_empty());
  }
}
