use anyhow::Result;

/// Recursively add a directory, building the tree bottom-up so every
/// subdirectory is a single `put_directory` call and siblings untouched
/// by this add keep whatever `Cid` they already had.
pub(crate) async fn add_directory<S: hashtree_core::store::Store>(
    tree: &hashtree_core::HashTree<S>,
    dir: &std::path::Path,
    respect_gitignore: bool,
) -> Result<hashtree_core::Cid> {
    use hashtree_core::DirEntry;
    use ignore::WalkBuilder;
    use std::collections::HashMap;

    let mut dir_contents: HashMap<String, Vec<(String, hashtree_core::Cid, u64)>> = HashMap::new();

    let walker = WalkBuilder::new(dir)
        .git_ignore(respect_gitignore)
        .git_global(respect_gitignore)
        .git_exclude(respect_gitignore)
        .hidden(false)
        .build();

    for result in walker {
        let entry = result?;
        let path = entry.path();

        if path == dir {
            continue;
        }

        let relative = path.strip_prefix(dir).unwrap_or(path);

        if path.is_file() {
            let bytes = std::fs::read(path)
                .map_err(|e| anyhow::anyhow!("failed to read {}: {}", path.display(), e))?;
            let result = tree
                .put_file(&bytes)
                .await
                .map_err(|e| anyhow::anyhow!("failed to add {}: {}", path.display(), e))?;

            let parent = relative
                .parent()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default();
            let name = relative
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();

            dir_contents
                .entry(parent)
                .or_default()
                .push((name, result.cid, result.size));
        } else if path.is_dir() {
            let dir_path = relative.to_string_lossy().to_string();
            dir_contents.entry(dir_path).or_default();
        }
    }

    // Deepest directories first, so a parent's `put_directory` can
    // reference its children's already-computed `Cid`s.
    let mut dirs: Vec<String> = dir_contents.keys().cloned().collect();
    dirs.sort_by(|a, b| {
        let depth_a = a.matches('/').count() + usize::from(!a.is_empty());
        let depth_b = b.matches('/').count() + usize::from(!b.is_empty());
        depth_b.cmp(&depth_a)
    });

    let mut dir_cids: HashMap<String, (hashtree_core::Cid, u64)> = HashMap::new();

    for dir_path in dirs {
        let files = dir_contents.get(&dir_path).cloned().unwrap_or_default();

        let mut entries: Vec<DirEntry> = files
            .into_iter()
            .map(|(name, cid, size)| DirEntry::from_cid(name, &cid).with_size(size))
            .collect();
        let mut total_size: u64 = entries.iter().filter_map(|e| e.size).sum();

        for (subdir_path, (cid, size)) in &dir_cids {
            let parent = std::path::Path::new(subdir_path)
                .parent()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default();

            if parent == dir_path {
                let name = std::path::Path::new(subdir_path)
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                entries.push(DirEntry::from_cid(name, cid).as_tree().with_size(*size));
                total_size += size;
            }
        }

        let result = tree
            .put_directory(entries)
            .await
            .map_err(|e| anyhow::anyhow!("failed to build directory node: {}", e))?;

        dir_cids.insert(dir_path, (result.cid, total_size));
    }

    dir_cids
        .get("")
        .map(|(cid, _)| *cid)
        .ok_or_else(|| anyhow::anyhow!("no files found under {}", dir.display()))
}
