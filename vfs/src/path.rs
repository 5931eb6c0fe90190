use alloc::borrow::ToOwned;
use alloc::string::String;
use alloc::vec::Vec;

pub trait Path: ToOwned {
    fn is_absolute(&self) -> bool;

    /// 返回不以`/`结束、不包含相对项的绝对路径。
    ///
    /// # 参数
    ///
    /// `cwd`: 当前工作目录，为绝对路径，且非根时不以`/`结束。
    fn canonicalize(&self, cwd: &Self) -> Option<Self::Owned>;

    fn is_relative(&self) -> bool {
        !self.is_absolute()
    }
}

impl Path for str {
    fn is_absolute(&self) -> bool {
        self.starts_with('/')
    }

    fn canonicalize(&self, cwd: &Self) -> Option<Self::Owned> {
        if self == "/" {
            return Some(String::from("/"));
        }

        let mut cmps = Vec::new();
        if self.is_relative() {
            // 防止第一个`/`带来的空字符串的影响，
            // 尤其是只有`cwd == /`时。
            cmps.extend(cwd.split('/').filter(|s| !s.is_empty()));
        }

        for cmp in self.split('/') {
            match cmp {
                ".." => {
                    cmps.pop()?;
                }
                "." | "" => (),
                s => cmps.push(s),
            }
        }

        if cmps.is_empty() {
            return Some(String::from("/"));
        }
        cmps.insert(0, ""); // 在接下来的拼接中代表根目录

        Some(cmps.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::Path;

    #[test]
    fn canonicalize() {
        assert_eq!("/a/./b/../c".canonicalize("/").as_deref(), Some("/a/c"));
        assert_eq!("x/y".canonicalize("/usr").as_deref(), Some("/usr/x/y"));
        assert_eq!("../..".canonicalize("/usr").as_deref(), None);
        assert_eq!("/a//b/".canonicalize("/").as_deref(), Some("/a/b"));
        assert_eq!("..".canonicalize("/usr").as_deref(), Some("/"));
    }
}
